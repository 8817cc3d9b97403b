//! Parallel work dispatcher
//!
//! Runs one closure per work unit, either inline on the calling thread or
//! scattered over a dedicated rayon pool once the unit count reaches the
//! threshold. Every unit is attempted; a panicking unit is caught at its
//! boundary and reported like any other failure.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, error};

use crate::game::constants::dispatch;

use super::error::BroadcastError;

/// Lifecycle of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Dispatched,
    Joined,
}

/// Where the units of the last dispatch ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    #[default]
    Inline,
    Parallel,
}

/// Result of one dispatch, one outcome per unit in unit order
#[derive(Debug)]
pub struct DispatchReport<R> {
    pub outcomes: Vec<Result<R, BroadcastError>>,
    pub mode: DispatchMode,
}

impl<R> DispatchReport<R> {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }

    /// All results, or the first error after every unit was attempted
    pub fn into_result(self) -> Result<Vec<R>, BroadcastError> {
        self.outcomes.into_iter().collect()
    }
}

/// Default threshold: a couple of units per available core
pub fn default_threshold() -> usize {
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    cores * dispatch::UNITS_PER_WORKER
}

pub struct ParallelDispatcher {
    threshold: usize,
    pool: Arc<ThreadPool>,
    state: DispatchState,
    last_mode: DispatchMode,
}

impl ParallelDispatcher {
    /// `worker_threads == 0` sizes the pool to the available cores
    pub fn new(threshold: usize, worker_threads: usize) -> Result<Self, BroadcastError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("broadcast-worker-{i}"))
            .build()
            .map_err(|e| BroadcastError::Config(format!("worker pool: {e}")))?;
        Ok(Self::with_pool(threshold, Arc::new(pool)))
    }

    /// Share an existing pool
    pub fn with_pool(threshold: usize, pool: Arc<ThreadPool>) -> Self {
        Self {
            threshold: threshold.max(1),
            pool,
            state: DispatchState::Idle,
            last_mode: DispatchMode::Inline,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold.max(1);
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn last_mode(&self) -> DispatchMode {
        self.last_mode
    }

    /// Mode a dispatch of `units` units would use
    pub fn mode_for(&self, units: usize) -> DispatchMode {
        if units >= self.threshold {
            DispatchMode::Parallel
        } else {
            DispatchMode::Inline
        }
    }

    /// Run `f` once per unit and block until all have finished
    pub fn dispatch<T, R, F>(&mut self, units: &mut [T], f: F) -> DispatchReport<R>
    where
        T: Send,
        R: Send,
        F: Fn(&mut T) -> Result<R, BroadcastError> + Sync,
    {
        let mode = self.mode_for(units.len());
        self.state = DispatchState::Dispatched;

        let run = |unit: &mut T| run_unit(&f, unit);
        let outcomes: Vec<_> = match mode {
            DispatchMode::Inline => units.iter_mut().map(run).collect(),
            DispatchMode::Parallel => self
                .pool
                .install(|| units.par_iter_mut().map(run).collect()),
        };

        self.state = DispatchState::Joined;
        self.last_mode = mode;
        let report = DispatchReport { outcomes, mode };
        let failures = report.failures();
        if failures > 0 {
            debug!(units = units.len(), failures, ?mode, "dispatch finished with failures");
        }
        report
    }
}

fn run_unit<T, R, F>(f: &F, unit: &mut T) -> Result<R, BroadcastError>
where
    F: Fn(&mut T) -> Result<R, BroadcastError>,
{
    match catch_unwind(AssertUnwindSafe(|| f(unit))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("work unit panicked: {message}");
            Err(BroadcastError::UnitPanicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

//! Broadcast engine
//!
//! One engine serves one avatar kind. Each call to [`BroadcastEngine::process`]
//! runs a full tick:
//!
//! 1. Prepare: reset per-tick avatar state and fill precomputed caches
//! 2. Resolution pass: every observer plans its transitions
//! 3. Encode pass: every observer writes its packet and consumes its reads
//! 4. Finish: clear unread blocks, roll coordinates, free released indices
//!
//! Passes 1-3 go through the dispatcher; a failing unit costs its observer
//! one packet and is reported to the exception handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::config::BroadcastConfig;
use crate::game::performance::TickBudgetMonitor;
use crate::game::repository::AvatarRepository;
use crate::game::zone::ZoneIndex;
use crate::info::codec::{Latin1Codec, TextCodec};
use crate::info::{EncodeContext, ObserverId};
use crate::metrics::Metrics;
use crate::net::assembler::ObserverPacket;
use crate::util::coord::CoordGrid;

use super::dispatcher::{default_threshold, DispatchMode, ParallelDispatcher};
use super::error::BroadcastError;
use super::exceptions::{AvatarFault, ExceptionHandler, LoggingExceptionHandler};
use super::filter::{AdmissionFilter, DefaultAdmissionFilter};
use super::observer::{Observer, UnitContext};
use super::profile::ProtocolProfile;
use super::tracker::{ResolutionTracker, Tier};

/// Totals for one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickStats {
    pub tick: u32,
    pub observers: usize,
    pub live_avatars: usize,
    pub packets: usize,
    pub bytes: u64,
    pub largest_packet: usize,
    pub adds: u64,
    pub removals: u64,
    pub info_written: u64,
    pub info_deferred: u64,
    /// Dirty avatars cleared without any observer reading them
    pub cleared_unread: usize,
    /// Indices that became reusable
    pub released: usize,
    /// Observers that received no packet
    pub failed_units: usize,
    /// Faults reported to the exception handler
    pub faults: usize,
    pub elapsed: Duration,
}

/// Everything one tick produced
#[derive(Debug)]
pub struct TickOutput {
    pub tick: u32,
    /// Packets in observer id order
    pub packets: Vec<ObserverPacket>,
    /// Observers whose unit failed this tick
    pub failed: Vec<ObserverId>,
    pub stats: TickStats,
    /// Where the encode pass ran
    pub mode: DispatchMode,
}

impl TickOutput {
    pub fn packet(&self, observer: ObserverId) -> Option<&ObserverPacket> {
        self.packets
            .binary_search_by_key(&observer, |p| p.observer)
            .ok()
            .map(|i| &self.packets[i])
    }
}

pub struct BroadcastEngine {
    profile: ProtocolProfile,
    config: BroadcastConfig,
    /// Sorted by id
    observers: Vec<Observer>,
    zones: ZoneIndex,
    dispatcher: ParallelDispatcher,
    filter: Arc<dyn AdmissionFilter>,
    handler: Arc<dyn ExceptionHandler>,
    codec: Arc<dyn TextCodec>,
    metrics: Option<Arc<Metrics>>,
    budget: TickBudgetMonitor,
}

impl BroadcastEngine {
    pub fn new(profile: ProtocolProfile, config: BroadcastConfig) -> Result<Self, BroadcastError> {
        config.validate().map_err(BroadcastError::Config)?;
        let threshold = config.parallel_threshold.unwrap_or_else(default_threshold);
        let dispatcher = ParallelDispatcher::new(threshold, config.worker_threads)?;
        let filter = DefaultAdmissionFilter::new(config.extended_info_ceiling, config.priority_policy);
        let budget = TickBudgetMonitor::new(Duration::from_millis(config.tick_duration_ms));

        debug!(
            kind = ?profile.kind,
            threshold,
            workers = dispatcher.worker_count(),
            "broadcast engine created"
        );
        Ok(Self {
            profile,
            config,
            observers: Vec::new(),
            zones: ZoneIndex::new(),
            dispatcher,
            filter: Arc::new(filter),
            handler: Arc::new(LoggingExceptionHandler),
            codec: Arc::new(Latin1Codec),
            metrics: None,
            budget,
        })
    }

    pub fn with_filter(mut self, filter: Arc<dyn AdmissionFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn TextCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn profile(&self) -> ProtocolProfile {
        self.profile
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    pub fn budget(&self) -> &TickBudgetMonitor {
        &self.budget
    }

    pub fn dispatcher(&self) -> &ParallelDispatcher {
        &self.dispatcher
    }

    pub fn set_parallel_threshold(&mut self, threshold: usize) {
        self.dispatcher.set_threshold(threshold);
    }

    // ========================================================================
    // Observers
    // ========================================================================

    fn position(&self, id: ObserverId) -> Result<usize, usize> {
        self.observers.binary_search_by_key(&id, |o| o.id())
    }

    /// Register an observer at `coord`. With `avatar` set, the view follows
    /// that avatar and never includes it.
    pub fn register_observer(
        &mut self,
        id: ObserverId,
        coord: CoordGrid,
        avatar: Option<u16>,
    ) -> Result<(), BroadcastError> {
        match self.position(id) {
            Ok(_) => Err(BroadcastError::DuplicateObserver { observer: id }),
            Err(at) => {
                let observer =
                    Observer::new(id, coord, self.config.resolution_radius, avatar, self.profile);
                self.observers.insert(at, observer);
                debug!(observer = id.0, %coord, "observer registered");
                Ok(())
            }
        }
    }

    /// Drop an observer; indices only it referenced become reusable at the
    /// end of the next tick
    pub fn unregister_observer(&mut self, id: ObserverId) -> bool {
        match self.position(id) {
            Ok(at) => {
                self.observers.remove(at);
                debug!(observer = id.0, "observer unregistered");
                true
            }
            Err(_) => false,
        }
    }

    pub fn update_observer(&mut self, id: ObserverId, coord: CoordGrid) -> bool {
        self.observer_mut(id).map(|o| o.set_coord(coord)).is_some()
    }

    pub fn set_observer_radius(&mut self, id: ObserverId, radius: u32) -> bool {
        self.observer_mut(id).map(|o| o.set_radius(radius)).is_some()
    }

    /// Forget an observer's client view, as after a reconnect
    pub fn reset_observer(&mut self, id: ObserverId) -> bool {
        self.observer_mut(id).map(Observer::reset).is_some()
    }

    pub fn observer(&self, id: ObserverId) -> Option<&Observer> {
        self.position(id).ok().map(|at| &self.observers[at])
    }

    fn observer_mut(&mut self, id: ObserverId) -> Option<&mut Observer> {
        self.position(id).ok().map(|at| &mut self.observers[at])
    }

    pub fn observer_tracker(&self, id: ObserverId) -> Option<&ResolutionTracker> {
        self.observer(id).map(Observer::tracker)
    }

    pub fn tier_of(&self, id: ObserverId, index: u16, repository: &AvatarRepository) -> Option<Tier> {
        self.observer_tracker(id)
            .map(|tracker| tracker.tier(index, repository))
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run one broadcast tick over `repository`
    pub fn process(&mut self, repository: &mut AvatarRepository) -> Result<TickOutput, BroadcastError> {
        repository.thread_guard().check("process")?;
        if repository.kind() != self.profile.kind {
            return Err(BroadcastError::Config(format!(
                "engine for {:?} given a {:?} repository",
                self.profile.kind,
                repository.kind()
            )));
        }
        if repository.capacity() > self.profile.index_capacity() {
            return Err(BroadcastError::Config(format!(
                "repository capacity {} exceeds the {}-index wire limit",
                repository.capacity(),
                self.profile.index_capacity()
            )));
        }

        let started = Instant::now();
        self.budget.tick_start();
        let tick = repository.tick();
        let mut faults = 0usize;

        // Prepare
        let encode_ctx = EncodeContext { codec: &*self.codec };
        let prepared = self.dispatcher.dispatch(repository.slots_mut(), |slot| {
            let Some(avatar) = slot.as_deref_mut() else {
                return Ok(());
            };
            avatar.begin_tick();
            let index = avatar.index();
            avatar.info_mut().precompute(&encode_ctx).map_err(|source| {
                avatar.poison();
                BroadcastError::Encode {
                    avatar: index,
                    source,
                }
            })
        });
        for (slot, outcome) in prepared.outcomes.into_iter().enumerate() {
            if let Err(error) = outcome {
                let index = slot as u16;
                if let Some(avatar) = repository.get(index) {
                    avatar.poison();
                }
                faults += 1;
                self.handler.on_fault(AvatarFault {
                    tick,
                    observer: None,
                    avatar: Some(index),
                    error,
                });
            }
        }

        self.zones.rebuild(repository);
        let unit = UnitContext {
            tick,
            repository: &*repository,
            ranges: &self.zones,
            profile: self.profile,
            filter: &*self.filter,
            handler: &*self.handler,
            soft_limit: self.config.soft_limit,
            hard_capacity: self.config.hard_capacity,
        };

        // Resolution pass
        let planned = self
            .dispatcher
            .dispatch(&mut self.observers, |observer| observer.plan_tick(&unit));
        let mut failed = Vec::new();
        for (observer, outcome) in self.observers.iter().zip(planned.outcomes) {
            if let Err(error) = outcome {
                failed.push(observer.id());
                report_unit_failure(&*self.handler, tick, observer.id(), error);
            }
        }

        // Encode pass
        let encoded = self
            .dispatcher
            .dispatch(&mut self.observers, |observer| observer.encode_tick(&unit));
        let mode = encoded.mode;
        let mut stats = TickStats {
            tick,
            observers: self.observers.len(),
            live_avatars: repository.live_count(),
            ..TickStats::default()
        };
        let mut packets = Vec::with_capacity(self.observers.len());
        for (observer, outcome) in self.observers.iter().zip(encoded.outcomes) {
            match outcome {
                Ok(Some(packet)) => {
                    stats.bytes += packet.len() as u64;
                    stats.largest_packet = stats.largest_packet.max(packet.len());
                    stats.adds += packet.stats.adds as u64;
                    stats.removals += packet.stats.removals as u64;
                    stats.info_written += packet.stats.info_written as u64;
                    stats.info_deferred += packet.stats.info_deferred as u64;
                    faults += packet.stats.info_faults as usize;
                    packets.push(packet);
                }
                Ok(None) => {}
                Err(error) => {
                    failed.push(observer.id());
                    report_unit_failure(&*self.handler, tick, observer.id(), error);
                }
            }
        }
        failed.sort_unstable();
        failed.dedup();

        // Finish
        let observers = &self.observers;
        let finished =
            repository.finish_tick(|index| observers.iter().any(|o| o.tracker().contains(index)));

        stats.packets = packets.len();
        stats.failed_units = failed.len();
        stats.faults = faults + failed.len();
        stats.cleared_unread = finished.cleared_unread;
        stats.released = finished.released;
        stats.elapsed = started.elapsed();

        self.budget.tick_end(self.observers.len());
        let status = self.budget.status();
        if let Some(metrics) = &self.metrics {
            metrics.record_tick(&stats, mode, repository.pool_stats());
            metrics.record_budget(status, self.budget.budget_usage_percent());
        }
        if status.is_overrunning() {
            warn!(tick, "broadcast over budget: {}", self.budget.status_message());
        }
        if stats.info_deferred > 0 {
            warn!(tick, deferred = stats.info_deferred, "extended info deferred under packet pressure");
        }
        debug!(
            tick,
            observers = stats.observers,
            packets = stats.packets,
            bytes = stats.bytes,
            failed = stats.failed_units,
            ?mode,
            elapsed_us = stats.elapsed.as_micros() as u64,
            "tick broadcast"
        );

        Ok(TickOutput {
            tick,
            packets,
            failed,
            stats,
            mode,
        })
    }
}

fn report_unit_failure(
    handler: &dyn ExceptionHandler,
    tick: u32,
    observer: ObserverId,
    error: BroadcastError,
) {
    error!(tick, observer = observer.0, "observer unit failed: {}", error);
    handler.on_fault(AvatarFault {
        tick,
        observer: Some(observer),
        avatar: error.avatar(),
        error,
    });
}

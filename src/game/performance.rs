//! Tick budget monitoring
//!
//! Tracks how much of the tick the broadcast takes and classifies it, so the
//! game loop can shed load (stop admitting observers) before ticks overrun.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::game::constants::tick;

/// Budget status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Under 30% of the tick
    Excellent,
    Good,
    /// Over 70% of the tick; stop admitting observers
    Warning,
    /// Over 90% of the tick
    Critical,
    /// Over the tick duration; ticks are slipping
    Overrun,
}

impl BudgetStatus {
    pub fn can_accept_observers(&self) -> bool {
        matches!(self, BudgetStatus::Excellent | BudgetStatus::Good)
    }

    pub fn is_overrunning(&self) -> bool {
        matches!(self, BudgetStatus::Overrun)
    }

    /// Numeric level for metrics (0 = excellent)
    pub fn level(&self) -> u64 {
        match self {
            BudgetStatus::Excellent => 0,
            BudgetStatus::Good => 1,
            BudgetStatus::Warning => 2,
            BudgetStatus::Critical => 3,
            BudgetStatus::Overrun => 4,
        }
    }
}

/// Rolling window of broadcast durations against the tick budget
pub struct TickBudgetMonitor {
    durations: VecDeque<Duration>,
    max_samples: usize,
    budget: Duration,
    excellent_threshold: f32,
    warning_threshold: f32,
    critical_threshold: f32,
    status: BudgetStatus,
    started: Option<Instant>,
    last_observer_count: usize,
}

impl TickBudgetMonitor {
    pub fn new(budget: Duration) -> Self {
        Self {
            durations: VecDeque::with_capacity(tick::BUDGET_SAMPLES),
            max_samples: tick::BUDGET_SAMPLES,
            budget,
            excellent_threshold: 0.3,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            status: BudgetStatus::Excellent,
            started: None,
            last_observer_count: 0,
        }
    }

    pub fn tick_start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn tick_end(&mut self, observer_count: usize) {
        if let Some(start) = self.started.take() {
            self.record(start.elapsed());
            self.last_observer_count = observer_count;
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.durations.push_back(duration);
        while self.durations.len() > self.max_samples {
            self.durations.pop_front();
        }
        self.update_status();
    }

    fn update_status(&mut self) {
        if self.durations.len() < 10 {
            return;
        }
        let ratio = self.average().as_secs_f32() / self.budget.as_secs_f32();
        self.status = if ratio < self.excellent_threshold {
            BudgetStatus::Excellent
        } else if ratio < self.warning_threshold {
            BudgetStatus::Good
        } else if ratio < self.critical_threshold {
            BudgetStatus::Warning
        } else if ratio < 1.0 {
            BudgetStatus::Critical
        } else {
            BudgetStatus::Overrun
        };
    }

    pub fn average(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.durations.iter().sum();
        sum / self.durations.len() as u32
    }

    pub fn p95(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.durations.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn status(&self) -> BudgetStatus {
        self.status
    }

    /// Average usage as a percentage of the budget (can exceed 100)
    pub fn budget_usage_percent(&self) -> f32 {
        self.average().as_secs_f32() / self.budget.as_secs_f32() * 100.0
    }

    pub fn last_observer_count(&self) -> usize {
        self.last_observer_count
    }

    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% budget, {} observers",
            self.status,
            self.budget_usage_percent(),
            self.last_observer_count
        )
    }
}

impl Default for TickBudgetMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(tick::TICK_DURATION_MS))
    }
}

//! Prometheus-compatible metrics endpoint
//!
//! Exposes broadcast engine metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::broadcast::dispatcher::DispatchMode;
use crate::broadcast::engine::TickStats;
use crate::game::performance::BudgetStatus;
use crate::game::pool::PoolStats;

const TICK_HISTORY: usize = 1000;

/// Metrics registry for the broadcast engine
#[derive(Debug)]
pub struct Metrics {
    // Population
    pub observers: AtomicU64,
    pub live_avatars: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Budget status (0=Excellent .. 4=Overrun)
    pub budget_status: AtomicU64,
    pub budget_usage_percent: AtomicU64,

    // Output
    pub packets_total: AtomicU64,
    pub bytes_total: AtomicU64,
    pub largest_packet_bytes: AtomicU64,
    pub adds_total: AtomicU64,
    pub removals_total: AtomicU64,

    // Extended info
    pub info_written_total: AtomicU64,
    pub info_deferred_total: AtomicU64,
    pub info_cleared_unread_total: AtomicU64,

    // Failures
    pub unit_failures_total: AtomicU64,
    pub avatar_faults_total: AtomicU64,

    // Dispatch
    pub dispatch_inline_total: AtomicU64,
    pub dispatch_parallel_total: AtomicU64,

    // Pool (cumulative counters copied from the repository)
    pub pool_hits: AtomicU64,
    pub pool_misses: AtomicU64,
    pub pool_evictions: AtomicU64,
    pub indices_released_total: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            observers: AtomicU64::new(0),
            live_avatars: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            budget_status: AtomicU64::new(0),
            budget_usage_percent: AtomicU64::new(0),
            packets_total: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            largest_packet_bytes: AtomicU64::new(0),
            adds_total: AtomicU64::new(0),
            removals_total: AtomicU64::new(0),
            info_written_total: AtomicU64::new(0),
            info_deferred_total: AtomicU64::new(0),
            info_cleared_unread_total: AtomicU64::new(0),
            unit_failures_total: AtomicU64::new(0),
            avatar_faults_total: AtomicU64::new(0),
            dispatch_inline_total: AtomicU64::new(0),
            dispatch_parallel_total: AtomicU64::new(0),
            pool_hits: AtomicU64::new(0),
            pool_misses: AtomicU64::new(0),
            pool_evictions: AtomicU64::new(0),
            indices_released_total: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Fold one tick's statistics into the registry
    pub fn record_tick(&self, stats: &TickStats, mode: DispatchMode, pool: PoolStats) {
        self.record_tick_time(stats.elapsed);
        self.observers.store(stats.observers as u64, Ordering::Relaxed);
        self.live_avatars.store(stats.live_avatars as u64, Ordering::Relaxed);

        self.packets_total.fetch_add(stats.packets as u64, Ordering::Relaxed);
        self.bytes_total.fetch_add(stats.bytes, Ordering::Relaxed);
        self.largest_packet_bytes
            .fetch_max(stats.largest_packet as u64, Ordering::Relaxed);
        self.adds_total.fetch_add(stats.adds, Ordering::Relaxed);
        self.removals_total.fetch_add(stats.removals, Ordering::Relaxed);

        self.info_written_total.fetch_add(stats.info_written, Ordering::Relaxed);
        self.info_deferred_total.fetch_add(stats.info_deferred, Ordering::Relaxed);
        self.info_cleared_unread_total
            .fetch_add(stats.cleared_unread as u64, Ordering::Relaxed);
        self.indices_released_total
            .fetch_add(stats.released as u64, Ordering::Relaxed);

        self.unit_failures_total
            .fetch_add(stats.failed_units as u64, Ordering::Relaxed);
        self.avatar_faults_total
            .fetch_add(stats.faults as u64, Ordering::Relaxed);

        match mode {
            DispatchMode::Inline => self.dispatch_inline_total.fetch_add(1, Ordering::Relaxed),
            DispatchMode::Parallel => self.dispatch_parallel_total.fetch_add(1, Ordering::Relaxed),
        };

        self.pool_hits.store(pool.hits, Ordering::Relaxed);
        self.pool_misses.store(pool.misses, Ordering::Relaxed);
        self.pool_evictions.store(pool.evictions, Ordering::Relaxed);
    }

    pub fn record_budget(&self, status: BudgetStatus, usage_percent: f32) {
        self.budget_status.store(status.level(), Ordering::Relaxed);
        self.budget_usage_percent
            .store(usage_percent.max(0.0) as u64, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn status_name(&self) -> &'static str {
        match self.budget_status.load(Ordering::Relaxed) {
            0 => "excellent",
            1 => "good",
            2 => "warning",
            3 => "critical",
            _ => "overrun",
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("avatar_broadcast_observers", "Registered observers", "gauge",
            self.observers.load(Ordering::Relaxed));
        metric!("avatar_broadcast_live_avatars", "Live avatars", "gauge",
            self.live_avatars.load(Ordering::Relaxed));

        metric!("avatar_broadcast_tick_time_microseconds", "Last broadcast time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("avatar_broadcast_tick_time_p95_microseconds", "95th percentile broadcast time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("avatar_broadcast_tick_time_p99_microseconds", "99th percentile broadcast time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("avatar_broadcast_tick_time_max_microseconds", "Maximum broadcast time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("avatar_broadcast_tick_count", "Ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("avatar_broadcast_budget_status", "Budget status (0=Excellent, 4=Overrun)", "gauge",
            self.budget_status.load(Ordering::Relaxed));
        metric!("avatar_broadcast_budget_usage_percent", "Tick budget usage percentage", "gauge",
            self.budget_usage_percent.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP avatar_broadcast_budget_state Human-readable budget state\n# TYPE avatar_broadcast_budget_state gauge\navatar_broadcast_budget_state{{state=\"{}\"}} 1\n",
            self.status_name()
        ));

        metric!("avatar_broadcast_packets_total", "Observer packets emitted", "counter",
            self.packets_total.load(Ordering::Relaxed));
        metric!("avatar_broadcast_bytes_total", "Bytes emitted", "counter",
            self.bytes_total.load(Ordering::Relaxed));
        metric!("avatar_broadcast_largest_packet_bytes", "Largest packet emitted", "gauge",
            self.largest_packet_bytes.load(Ordering::Relaxed));
        metric!("avatar_broadcast_adds_total", "Low to high resolution transitions", "counter",
            self.adds_total.load(Ordering::Relaxed));
        metric!("avatar_broadcast_removals_total", "High to low resolution transitions", "counter",
            self.removals_total.load(Ordering::Relaxed));

        metric!("avatar_broadcast_info_written_total", "Extended-info entries written", "counter",
            self.info_written_total.load(Ordering::Relaxed));
        metric!("avatar_broadcast_info_deferred_total", "Extended-info entries deferred by the budget", "counter",
            self.info_deferred_total.load(Ordering::Relaxed));
        metric!("avatar_broadcast_info_cleared_unread_total", "Dirty avatars cleared with no reader", "counter",
            self.info_cleared_unread_total.load(Ordering::Relaxed));

        metric!("avatar_broadcast_unit_failures_total", "Observer units that produced no packet", "counter",
            self.unit_failures_total.load(Ordering::Relaxed));
        metric!("avatar_broadcast_avatar_faults_total", "Faults reported to the exception handler", "counter",
            self.avatar_faults_total.load(Ordering::Relaxed));

        metric!("avatar_broadcast_dispatch_inline_total", "Ticks encoded on the calling thread", "counter",
            self.dispatch_inline_total.load(Ordering::Relaxed));
        metric!("avatar_broadcast_dispatch_parallel_total", "Ticks encoded on the worker pool", "counter",
            self.dispatch_parallel_total.load(Ordering::Relaxed));

        metric!("avatar_broadcast_pool_hits", "Avatars reused from the pool", "counter",
            self.pool_hits.load(Ordering::Relaxed));
        metric!("avatar_broadcast_pool_misses", "Avatars constructed fresh", "counter",
            self.pool_misses.load(Ordering::Relaxed));
        metric!("avatar_broadcast_pool_evictions", "Parked avatars evicted", "counter",
            self.pool_evictions.load(Ordering::Relaxed));
        metric!("avatar_broadcast_indices_released_total", "Indices freed for reuse", "counter",
            self.indices_released_total.load(Ordering::Relaxed));
        metric!("avatar_broadcast_uptime_seconds", "Uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let body = serde_json::json!({
            "population": {
                "observers": load(&self.observers),
                "live_avatars": load(&self.live_avatars),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
                "status": load(&self.budget_status),
                "status_name": self.status_name(),
                "budget_percent": load(&self.budget_usage_percent),
            },
            "output": {
                "packets": load(&self.packets_total),
                "bytes": load(&self.bytes_total),
                "largest_packet": load(&self.largest_packet_bytes),
                "adds": load(&self.adds_total),
                "removals": load(&self.removals_total),
            },
            "extended_info": {
                "written": load(&self.info_written_total),
                "deferred": load(&self.info_deferred_total),
                "cleared_unread": load(&self.info_cleared_unread_total),
            },
            "failures": {
                "units": load(&self.unit_failures_total),
                "faults": load(&self.avatar_faults_total),
            },
            "dispatch": {
                "inline": load(&self.dispatch_inline_total),
                "parallel": load(&self.dispatch_parallel_total),
            },
            "pool": {
                "hits": load(&self.pool_hits),
                "misses": load(&self.pool_misses),
                "evictions": load(&self.pool_evictions),
                "indices_released": load(&self.indices_released_total),
            },
            "uptime_seconds": self.uptime_seconds(),
        });
        serde_json::to_string_pretty(&body).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics/json") {
                        http_response("application/json", &metrics.to_json())
                    } else if request.starts_with("GET /metrics") {
                        http_response("text/plain; version=0.0.4", &metrics.to_prometheus())
                    } else if request.starts_with("GET /health") {
                        http_response("text/plain", "OK")
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

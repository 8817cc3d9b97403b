use serde::{Deserialize, Serialize};

use crate::broadcast::filter::PriorityPolicy;
use crate::game::constants::{packet, pool, tick, view};
use crate::game::thread_guard::ThreadSafetyMode;
use crate::info::catalogue::MAX_EXTENDED_INFO_SIZE;

/// Broadcast engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Observer count at which units run on the worker pool
    /// (`None`: a couple of units per available core)
    pub parallel_threshold: Option<usize>,
    /// Worker pool size (0: one per core)
    pub worker_threads: usize,
    /// Worst-case extended-info bytes the admission filter reserves per avatar
    pub extended_info_ceiling: usize,
    /// Who wins when the packet budget runs short
    pub priority_policy: PriorityPolicy,
    /// Default view radius in tiles
    pub resolution_radius: u32,
    /// How mutations from foreign threads are treated
    pub thread_safety_mode: ThreadSafetyMode,
    /// Packets above this size are never produced
    pub hard_capacity: usize,
    /// Budget the admission filter works against
    pub soft_limit: usize,
    /// Released avatars kept for reuse
    pub pool_capacity: usize,
    /// Target tick length
    pub tick_duration_ms: u64,
    /// Port for the metrics endpoint
    pub metrics_port: u16,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: None,
            worker_threads: 0,
            extended_info_ceiling: MAX_EXTENDED_INFO_SIZE,
            priority_policy: PriorityPolicy::default(),
            resolution_radius: view::DEFAULT_RADIUS,
            thread_safety_mode: ThreadSafetyMode::Strict,
            hard_capacity: packet::HARD_CAPACITY,
            soft_limit: packet::SOFT_LIMIT,
            pool_capacity: pool::DEFAULT_CAPACITY,
            tick_duration_ms: tick::TICK_DURATION_MS,
            metrics_port: 9090,
        }
    }
}

impl BroadcastConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(threshold) = std::env::var("PARALLEL_THRESHOLD") {
            match threshold.parse::<usize>() {
                Ok(parsed) if parsed > 0 => config.parallel_threshold = Some(parsed),
                Ok(_) => tracing::warn!("PARALLEL_THRESHOLD must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid PARALLEL_THRESHOLD '{}', using default", threshold),
            }
        }

        if let Ok(workers) = std::env::var("WORKER_THREADS") {
            if let Ok(parsed) = workers.parse::<usize>() {
                if parsed <= 1024 {
                    config.worker_threads = parsed;
                } else {
                    tracing::warn!("WORKER_THREADS must be 0-1024, using default");
                }
            } else {
                tracing::warn!("Invalid WORKER_THREADS '{}', using default", workers);
            }
        }

        if let Ok(ceiling) = std::env::var("EXTENDED_INFO_CEILING") {
            if let Ok(parsed) = ceiling.parse::<usize>() {
                if parsed > 0 {
                    config.extended_info_ceiling = parsed;
                } else {
                    tracing::warn!("EXTENDED_INFO_CEILING must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid EXTENDED_INFO_CEILING '{}', using default", ceiling);
            }
        }

        if let Ok(radius) = std::env::var("RESOLUTION_RADIUS") {
            if let Ok(parsed) = radius.parse::<u32>() {
                if parsed <= view::MAX_RADIUS {
                    config.resolution_radius = parsed;
                } else {
                    tracing::warn!("RESOLUTION_RADIUS must be 0-{}, using default", view::MAX_RADIUS);
                }
            } else {
                tracing::warn!("Invalid RESOLUTION_RADIUS '{}', using default", radius);
            }
        }

        if let Ok(mode) = std::env::var("THREAD_SAFETY_MODE") {
            if let Ok(parsed) = mode.parse() {
                config.thread_safety_mode = parsed;
            } else {
                tracing::warn!("Invalid THREAD_SAFETY_MODE '{}', using default", mode);
            }
        }

        if let Ok(capacity) = std::env::var("PACKET_HARD_CAPACITY") {
            if let Ok(parsed) = capacity.parse::<usize>() {
                config.hard_capacity = parsed;
            } else {
                tracing::warn!("Invalid PACKET_HARD_CAPACITY '{}', using default", capacity);
            }
        }

        if let Ok(limit) = std::env::var("PACKET_SOFT_LIMIT") {
            if let Ok(parsed) = limit.parse::<usize>() {
                config.soft_limit = parsed;
            } else {
                tracing::warn!("Invalid PACKET_SOFT_LIMIT '{}', using default", limit);
            }
        }

        if let Ok(capacity) = std::env::var("POOL_CAPACITY") {
            if let Ok(parsed) = capacity.parse::<usize>() {
                config.pool_capacity = parsed;
            } else {
                tracing::warn!("Invalid POOL_CAPACITY '{}', using default", capacity);
            }
        }

        if let Ok(duration) = std::env::var("TICK_DURATION_MS") {
            if let Ok(parsed) = duration.parse::<u64>() {
                if parsed > 0 {
                    config.tick_duration_ms = parsed;
                } else {
                    tracing::warn!("TICK_DURATION_MS must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid TICK_DURATION_MS '{}', using default", duration);
            }
        }

        if let Ok(port) = std::env::var("METRICS_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.metrics_port = parsed;
                } else {
                    tracing::warn!("METRICS_PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid METRICS_PORT '{}', using default", port);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.parallel_threshold == Some(0) {
            return Err("parallel_threshold must be at least 1".to_string());
        }
        if self.hard_capacity == 0 {
            return Err("hard_capacity cannot be 0".to_string());
        }
        if self.soft_limit > self.hard_capacity {
            return Err("soft_limit cannot exceed hard_capacity".to_string());
        }
        if self.extended_info_ceiling == 0 {
            return Err("extended_info_ceiling must be at least 1".to_string());
        }
        if self.resolution_radius > view::MAX_RADIUS {
            return Err(format!("resolution_radius cannot exceed {}", view::MAX_RADIUS));
        }
        if self.tick_duration_ms == 0 {
            return Err("tick_duration_ms cannot be 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BroadcastConfig::default();
        assert_eq!(config.hard_capacity, 40_000);
        assert_eq!(config.soft_limit, 30_000);
        assert_eq!(config.resolution_radius, 15);
        assert_eq!(config.tick_duration_ms, 600);
        assert_eq!(config.extended_info_ceiling, MAX_EXTENDED_INFO_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = BroadcastConfig::load_or_default();
        assert!(config.tick_duration_ms > 0);
    }

    #[test]
    fn test_soft_limit_above_hard_capacity_rejected() {
        let config = BroadcastConfig {
            soft_limit: 50_000,
            ..BroadcastConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip_with_defaults() {
        let config: BroadcastConfig =
            serde_json::from_str(r#"{"soft_limit": 20000, "priority_policy": {"policy": "uniform"}}"#)
                .unwrap();
        assert_eq!(config.soft_limit, 20_000);
        assert_eq!(config.priority_policy, PriorityPolicy::Uniform);
        assert_eq!(config.hard_capacity, 40_000);

        let json = serde_json::to_string(&config).unwrap();
        let back: BroadcastConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}

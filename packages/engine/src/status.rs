// packages/engine/src/status.rs
//! Component and system status reporting
//!
//! Every long-lived component exposes a `ComponentStatus` snapshot; the
//! engine aggregates them into a `SystemStatus`. `SystemHealth` is the
//! admission-control verdict derived from the engine's own counters (queue
//! fullness, drop totals, dead workers).

use std::collections::BTreeMap;

use serde::Serialize;

/// Health verdict of a single component.
pub const HEALTHY: &str = "healthy";
pub const UNHEALTHY: &str = "unhealthy";

/// Point-in-time snapshot of one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    /// `"healthy"` or `"unhealthy"`.
    pub health: String,
    /// Component-specific counters and gauges.
    pub metrics: serde_json::Value,
}

impl ComponentStatus {
    pub fn new(name: impl Into<String>, health: &str, metrics: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            health: health.to_string(),
            metrics,
        }
    }
}

/// Aggregated engine snapshot returned by `Engine::get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub is_running: bool,
    /// Tasks submitted whose results have not yet been delivered.
    pub pending_count: usize,
    pub components: BTreeMap<String, ComponentStatus>,
}

/// Coarse load verdict used for admission decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Healthy,
    Warning,
    Critical,
}

impl SystemHealth {
    /// Whether new submissions should be accepted under this verdict.
    pub fn should_accept_tasks(&self) -> bool {
        *self != SystemHealth::Critical
    }
}

/// Internal signals the health verdict is computed from.
#[derive(Debug, Clone, Copy)]
pub struct HealthSignals {
    /// Input queue fill ratio, 0.0 - 1.0.
    pub input_fullness: f64,
    /// Submissions dropped for queue-full since start.
    pub total_dropped: u64,
    /// Worker processes currently unreachable.
    pub dead_workers: usize,
    pub total_workers: usize,
}

impl HealthSignals {
    /// Derive the verdict. Thresholds: a near-full admission queue or a
    /// fully dead pool is critical; elevated fill or any dead worker is a
    /// warning.
    pub fn verdict(&self) -> SystemHealth {
        if self.total_workers > 0 && self.dead_workers >= self.total_workers {
            return SystemHealth::Critical;
        }
        if self.input_fullness >= 0.95 {
            return SystemHealth::Critical;
        }
        if self.input_fullness >= 0.80 || self.dead_workers > 0 || self.total_dropped > 100 {
            return SystemHealth::Warning;
        }
        SystemHealth::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> HealthSignals {
        HealthSignals {
            input_fullness: 0.0,
            total_dropped: 0,
            dead_workers: 0,
            total_workers: 4,
        }
    }

    #[test]
    fn idle_system_is_healthy() {
        assert_eq!(signals().verdict(), SystemHealth::Healthy);
        assert!(signals().verdict().should_accept_tasks());
    }

    #[test]
    fn near_full_queue_is_critical() {
        let s = HealthSignals {
            input_fullness: 0.96,
            ..signals()
        };
        assert_eq!(s.verdict(), SystemHealth::Critical);
        assert!(!s.verdict().should_accept_tasks());
    }

    #[test]
    fn one_dead_worker_warns_all_dead_is_critical() {
        let one = HealthSignals {
            dead_workers: 1,
            ..signals()
        };
        assert_eq!(one.verdict(), SystemHealth::Warning);

        let all = HealthSignals {
            dead_workers: 4,
            ..signals()
        };
        assert_eq!(all.verdict(), SystemHealth::Critical);
    }
}

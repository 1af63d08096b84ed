// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! A single flat config struct covers the whole system: queue bounds, worker
//! pool shape, dispatcher width, poll intervals and the result-cache
//! geometry. Defaults are sized for a single host and rarely need changing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::errors::{EngineError, Result};

/// Engine configuration. All knobs in one place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on the input (admission) queue.
    pub input_queue_size: usize,

    /// Bound on the output (result) queue.
    pub output_queue_size: usize,

    /// Number of CPU-class worker processes.
    pub cpu_bound_count: usize,

    /// Number of I/O-class worker processes. `None` resolves to
    /// `max(1, cores - 1)` at start.
    pub io_bound_count: Option<usize>,

    /// Threads per CPU-class worker.
    pub cpu_bound_task_limit: usize,

    /// Threads per I/O-class worker.
    pub io_bound_task_limit: usize,

    /// Number of dispatcher threads draining the input queue.
    pub queue_thread_count: usize,

    /// Max blocking interval for any polling operation, in seconds.
    pub queue_poll_timeout_secs: f64,

    /// Retries for `submit_task` when the input queue is full.
    pub max_queue_full_retries: u32,

    /// Grace interval for winding down dispatchers and workers, in seconds.
    pub shutdown_timeout_secs: f64,

    /// Capacity of the task channel inside each worker process.
    pub worker_channel_capacity: usize,

    /// Shard count of the result cache.
    pub shard_count: usize,

    /// LRU bound per result-cache shard.
    pub max_results_per_shard: usize,

    /// Logger threshold ("TRACE".."ERROR").
    pub log_level: String,

    /// Explicit path to the worker binary. When unset the engine looks for
    /// `taskmill-worker` next to the current executable, then in
    /// `$TASKMILL_WORKER_BIN`, then on `$PATH`.
    pub worker_binary: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_queue_size: 1000,
            output_queue_size: 10_000,
            cpu_bound_count: 1,
            io_bound_count: None,
            cpu_bound_task_limit: 1,
            io_bound_task_limit: 20,
            queue_thread_count: 4,
            queue_poll_timeout_secs: 1.0,
            max_queue_full_retries: 3,
            shutdown_timeout_secs: 10.0,
            worker_channel_capacity: 1024,
            shard_count: 16,
            max_results_per_shard: 100,
            log_level: "INFO".to_string(),
            worker_binary: None,
        }
    }
}

const VALID_LOG_LEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

impl EngineConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges. Called by `Engine::start`.
    pub fn validate(&self) -> Result<()> {
        if self.input_queue_size < 1 {
            return Err(EngineError::Config("input_queue_size must be >= 1".into()));
        }
        if self.output_queue_size < 1 {
            return Err(EngineError::Config("output_queue_size must be >= 1".into()));
        }
        if self.cpu_bound_count < 1 {
            return Err(EngineError::Config("cpu_bound_count must be >= 1".into()));
        }
        if let Some(n) = self.io_bound_count {
            if n < 1 {
                return Err(EngineError::Config("io_bound_count must be >= 1".into()));
            }
        }
        if self.cpu_bound_task_limit < 1 {
            return Err(EngineError::Config("cpu_bound_task_limit must be >= 1".into()));
        }
        if self.io_bound_task_limit < 1 {
            return Err(EngineError::Config("io_bound_task_limit must be >= 1".into()));
        }
        if self.queue_thread_count < 1 {
            return Err(EngineError::Config("queue_thread_count must be >= 1".into()));
        }
        if self.worker_channel_capacity < 1 {
            return Err(EngineError::Config(
                "worker_channel_capacity must be >= 1".into(),
            ));
        }
        if self.shard_count < 1 {
            return Err(EngineError::Config("shard_count must be >= 1".into()));
        }
        if self.max_results_per_shard < 1 {
            return Err(EngineError::Config(
                "max_results_per_shard must be >= 1".into(),
            ));
        }
        let level = self.log_level.to_uppercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(EngineError::Config(format!(
                "unknown log_level: {}",
                self.log_level
            )));
        }
        Ok(())
    }

    /// I/O-class worker count with the `None` default resolved.
    pub fn resolved_io_bound_count(&self) -> usize {
        self.io_bound_count
            .unwrap_or_else(|| std::cmp::max(1, num_cpus::get().saturating_sub(1)))
    }

    pub fn queue_poll_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.queue_poll_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.input_queue_size, 1000);
        assert_eq!(config.queue_thread_count, 4);
        assert!(config.resolved_io_bound_count() >= 1);
    }

    #[test]
    fn rejects_zero_dispatchers() {
        let config = EngineConfig {
            queue_thread_count: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let config = EngineConfig {
            log_level: "LOUD".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn loads_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cpu_bound_count": 2, "io_bound_count": 3}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.cpu_bound_count, 2);
        assert_eq!(config.resolved_io_bound_count(), 3);
        assert_eq!(config.input_queue_size, 1000);
    }
}

// packages/engine/src/utils/errors.rs
//! Engine error taxonomy
//!
//! Engine-level failures only. Anything scoped to a single task (a script
//! that fails, a worker that dies mid-task, an envelope that cannot be
//! decoded at a boundary) is reified as a FAILED result and travels through
//! the output queue instead of surfacing here.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start()` called while the engine is already running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// API called before `start()` or after `shutdown()`.
    #[error("engine is not running")]
    NotRunning,

    /// Input queue saturated beyond the configured retry budget.
    #[error("input queue full after {attempts} attempt(s)")]
    QueueFull { attempts: u32 },

    /// Configuration rejected during validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A task or result envelope could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IPC round-trip to a worker failed or timed out during dispatch.
    #[error("worker {worker_id} is unreachable")]
    WorkerUnreachable { worker_id: String },

    /// A worker child process could not be spawned.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(String),

    /// Engine threads/processes did not wind down within the grace interval.
    #[error("shutdown did not complete within the grace interval")]
    ShutdownTimeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

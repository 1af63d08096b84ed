// packages/engine/src/lib.rs
//! Taskmill execution engine library
//!
//! A local task-execution engine: scripts are submitted as tasks, routed by
//! class (CPU-bound or I/O-bound) to a pool of worker processes, executed
//! on a thread pool inside the chosen worker, and collected asynchronously
//! by task id.
//!
//! # Architecture
//!
//! ```text
//! submit ──► InputQueue ──► Dispatcher (xK) ──► ProcessPool
//!                                                   │ least-loaded
//!                                   ┌───────────────┴───────────────┐
//!                                   │ cpu workers   │   io workers  │
//!                                   │ (few threads) │ (many threads)│
//!                                   └───────┬───────┴───────┬───────┘
//!                                           └───── results ─┘
//!                                                   │
//! get_result ◄── ShardedResultCache ◄── OutputQueue ┘
//! ```
//!
//! Modules:
//!
//! - **engine**: the façade, dispatcher threads, result cache, workflows
//! - **worker**: process pool, worker handles, the child main loop
//! - **executor**: the script-execution collaborator
//! - **queue**: bounded MPMC envelope queues
//! - **task**: task/result data types and wire envelopes
//! - **status**: component snapshots and system health
//! - **utils**: configuration and errors

pub mod engine;
pub mod executor;
pub mod observability;
pub mod queue;
pub mod status;
pub mod task;
pub mod utils;
pub mod worker;

// Re-export the surface most callers need.
pub use engine::{Engine, WorkflowManager, WorkflowTask};
pub use executor::{ExecutionContext, ScriptExecutor, TaskExecutor};
pub use status::{ComponentStatus, SystemHealth, SystemStatus};
pub use task::{Task, TaskClass, TaskResult, TaskStatus};
pub use utils::{EngineConfig, EngineError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

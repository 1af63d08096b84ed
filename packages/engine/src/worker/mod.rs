// packages/engine/src/worker/mod.rs
//! Worker tier
//!
//! The two-level worker hierarchy and its IPC plumbing:
//!
//! - **ProcessPool**: the CPU and I/O worker groups plus least-loaded routing
//! - **WorkerHandle**: parent-side pipes, status polling, crash detection
//! - **child**: the worker binary's command loop
//! - **ThreadPool**: executor threads inside a worker process
//! - **protocol**: the JSON-lines envelopes on the pipes
//!
//! ```text
//! Engine ── dispatcher ──► ProcessPool ──► WorkerHandle ══ pipes ══ child
//!                                                                    │
//!                                                               ThreadPool
//!                                                                    │
//!                                                                Executor
//! ```

pub mod child;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod thread_pool;

pub use child::{run as run_worker, WorkerOptions};
pub use pool::ProcessPool;
pub use process::WorkerHandle;
pub use thread_pool::{ResultSink, ThreadPool};

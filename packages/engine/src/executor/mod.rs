// packages/engine/src/executor/mod.rs
//! Script execution
//!
//! The executor is the collaborator that actually runs user code. The
//! engine only depends on the `TaskExecutor` contract; `ScriptExecutor` is
//! the default interpreter-spawning implementation used by worker
//! processes.

pub mod context;
pub mod script;

pub use context::ExecutionContext;
pub use script::{ScriptExecutor, TaskExecutor};

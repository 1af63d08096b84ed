// packages/engine/src/executor/context.rs
//! Execution context handed to a script for the duration of one run.

use serde::Serialize;

/// Identifies the task and the worker servicing it. Scripts receive it in
/// the request envelope and through `TASKMILL_TASK_ID` / `TASKMILL_WORKER_ID`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub task_id: String,
    /// Stable worker identity, e.g. "cpu-0" or "io-3".
    pub worker_id: String,
}

impl ExecutionContext {
    pub fn new(task_id: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            worker_id: worker_id.into(),
        }
    }
}

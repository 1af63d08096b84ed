// packages/engine/src/task/task.rs
//! Task definition and wire envelope
//!
//! A task names a script to run, the parameters to hand it, and the worker
//! class that should service it. Tasks cross two serialization boundaries:
//! once into the input queue at submission, and once more over a worker's
//! command pipe at dispatch. The envelope is the authoritative wire shape
//! for both.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which worker group services a task.
///
/// CPU workers are few with few threads; I/O workers are many with many
/// threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    CpuBound,
    IoBound,
}

impl TaskClass {
    /// Prefix used in stable worker identities ("cpu-3", "io-7").
    pub fn worker_prefix(&self) -> &'static str {
        match self {
            TaskClass::CpuBound => "cpu",
            TaskClass::IoBound => "io",
        }
    }
}

/// A request to execute a script with supplied parameters.
#[derive(Debug, Clone)]
pub struct Task {
    /// Globally unique id (UUID v4), assigned at creation.
    pub id: String,

    /// Path of the script to execute.
    pub script_path: PathBuf,

    /// Parameters handed to the script. Expected to be a JSON object.
    pub params: serde_json::Value,

    /// Worker class routing.
    pub class: TaskClass,

    /// Retry budget carried with the task.
    pub max_retries: u32,

    /// Creation timestamp. Not carried on the wire.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with a fresh id.
    pub fn new(
        script_path: impl Into<PathBuf>,
        params: serde_json::Value,
        class: TaskClass,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            script_path: script_path.into(),
            params,
            class,
            max_retries: 3,
            created_at: Utc::now(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Wire form for the input queue and the command pipe.
    pub fn to_envelope(&self) -> TaskEnvelope {
        TaskEnvelope {
            task_id: self.id.clone(),
            script_path: self.script_path.clone(),
            params: self.params.clone(),
            task_type: self.class,
            max_retries: self.max_retries,
        }
    }
}

/// Serialized task shape shared by the input queue and the command pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: String,
    pub script_path: PathBuf,
    pub params: serde_json::Value,
    pub task_type: TaskClass,
    pub max_retries: u32,
}

impl TaskEnvelope {
    /// Rebuild a task on the far side of a serialization boundary.
    ///
    /// `created_at` is stamped afresh; it never crosses the wire.
    pub fn into_task(self) -> Task {
        Task {
            id: self.task_id,
            script_path: self.script_path,
            params: self.params,
            class: self.task_type,
            max_retries: self.max_retries,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_wire_field_names() {
        let task = Task::new("/tmp/double.py", json!({"v": 42}), TaskClass::IoBound);
        let value = serde_json::to_value(task.to_envelope()).unwrap();

        assert_eq!(value["task_id"], json!(task.id));
        assert_eq!(value["task_type"], json!("io_bound"));
        assert_eq!(value["params"]["v"], json!(42));
        assert_eq!(value["max_retries"], json!(3));
    }

    #[test]
    fn envelope_round_trips_identity() {
        let task = Task::new("/tmp/a.sh", json!({}), TaskClass::CpuBound).with_max_retries(0);
        let json = serde_json::to_string(&task.to_envelope()).unwrap();
        let back: TaskEnvelope = serde_json::from_str(&json).unwrap();
        let rebuilt = back.into_task();

        assert_eq!(rebuilt.id, task.id);
        assert_eq!(rebuilt.class, TaskClass::CpuBound);
        assert_eq!(rebuilt.max_retries, 0);
    }

    #[test]
    fn fresh_tasks_get_distinct_ids() {
        let a = Task::new("/tmp/x.sh", json!({}), TaskClass::IoBound);
        let b = Task::new("/tmp/x.sh", json!({}), TaskClass::IoBound);
        assert_ne!(a.id, b.id);
    }
}

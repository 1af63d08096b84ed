// packages/engine/src/task/result.rs
//! Task results
//!
//! The outcome of executing a task: SUCCESS with data, or FAILED with a
//! message and structured details. Results are serialized into the output
//! queue by worker processes and deserialized by the engine; the envelope
//! fields here are the authoritative wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result status on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
}

/// The outcome of executing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,

    pub status: TaskStatus,

    /// Script return value. SUCCESS only.
    #[serde(default)]
    pub data: Option<serde_json::Value>,

    /// Human-readable failure message. FAILED only.
    #[serde(default)]
    pub error: Option<String>,

    /// Structured failure detail (at minimum a `kind`). FAILED only.
    #[serde(default)]
    pub error_details: Option<serde_json::Value>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(
        task_id: impl Into<String>,
        data: serde_json::Value,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Success,
            data: Some(data),
            error: None,
            error_details: None,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        error: impl Into<String>,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            data: None,
            error: Some(error.into()),
            error_details: None,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn failed_with_details(
        task_id: impl Into<String>,
        error: impl Into<String>,
        details: serde_json::Value,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            error_details: Some(details),
            ..Self::failed(task_id, error, started_at)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Wall time of the execution, when the worker recorded a start.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.started_at.map(|s| self.completed_at - s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_shape() {
        let result = TaskResult::success("t-1", json!({"result": 84}), Some(Utc::now()));
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["status"], json!("SUCCESS"));
        assert_eq!(value["data"]["result"], json!(84));
        assert_eq!(value["error"], json!(null));
        assert!(value["completed_at"].is_string());
    }

    #[test]
    fn failed_envelope_carries_details() {
        let result = TaskResult::failed_with_details(
            "t-2",
            "script exited with status 3",
            json!({"kind": "nonzero_exit", "exit_code": 3}),
            None,
        );
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["status"], json!("FAILED"));
        assert_eq!(value["data"], json!(null));
        assert_eq!(value["error_details"]["kind"], json!("nonzero_exit"));
        assert_eq!(value["started_at"], json!(null));
    }

    #[test]
    fn decodes_minimal_failed_envelope() {
        let raw = r#"{"task_id":"t-3","status":"FAILED","error":"boom",
                      "completed_at":"2026-01-05T10:00:00Z"}"#;
        let result: TaskResult = serde_json::from_str(raw).unwrap();
        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.data.is_none());
        assert!(result.duration().is_none());
    }
}

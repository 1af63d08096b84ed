// packages/engine/src/worker/protocol.rs
//! Command/status pipe envelopes
//!
//! JSON-lines protocol between the engine and a worker child. The command
//! pipe (child stdin) carries `execute_task` / `get_status` / `stop`; the
//! child's stdout carries status replies and result envelopes back.

use serde::{Deserialize, Serialize};

use crate::task::TaskEnvelope;

/// Commands accepted by a worker child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ExecuteTask,
    GetStatus,
    Stop,
}

/// One line on the command pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: Command,
    /// Present for `execute_task` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskEnvelope>,
}

impl CommandEnvelope {
    pub fn execute(task: TaskEnvelope) -> Self {
        Self {
            command: Command::ExecuteTask,
            task: Some(task),
        }
    }

    pub fn get_status() -> Self {
        Self {
            command: Command::GetStatus,
            task: None,
        }
    }

    pub fn stop() -> Self {
        Self {
            command: Command::Stop,
            task: None,
        }
    }
}

/// Reply to `get_status` on the child's outbound stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatusReply {
    pub active_threads: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskClass};
    use serde_json::json;

    #[test]
    fn command_wire_shapes() {
        let stop = serde_json::to_value(CommandEnvelope::stop()).unwrap();
        assert_eq!(stop, json!({"command": "stop"}));

        let status = serde_json::to_value(CommandEnvelope::get_status()).unwrap();
        assert_eq!(status, json!({"command": "get_status"}));

        let task = Task::new("/tmp/s.sh", json!({}), TaskClass::IoBound);
        let execute = serde_json::to_value(CommandEnvelope::execute(task.to_envelope())).unwrap();
        assert_eq!(execute["command"], json!("execute_task"));
        assert_eq!(execute["task"]["task_id"], json!(task.id));
    }

    #[test]
    fn status_reply_does_not_decode_result_lines() {
        // The parent-side demux relies on this: a result envelope must not
        // parse as a status reply.
        let result_line = r#"{"task_id":"t","status":"SUCCESS","completed_at":"2026-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<StatusReply>(result_line).is_err());

        let status_line = r#"{"active_threads":7}"#;
        let reply: StatusReply = serde_json::from_str(status_line).unwrap();
        assert_eq!(reply.active_threads, 7);
    }
}

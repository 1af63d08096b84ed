// packages/engine/src/executor/script.rs
//! Script executor
//!
//! Runs a task's script in an interpreter child process and captures its
//! output as the result data. The wire contract with the script:
//!
//! - stdin receives one JSON request: `{"params": .., "context":
//!   {"task_id": .., "worker_id": ..}}`
//! - stdout is parsed as JSON into `Result.data` (non-JSON output is
//!   carried as a plain string)
//! - the context is additionally exported as `TASKMILL_TASK_ID` and
//!   `TASKMILL_WORKER_ID`
//!
//! Interpreters are selected by extension: `.py` → python3 (supporting both
//! a free `main(params, context)` and a `module()` factory exposing
//! `run(params)`), `.js` → node (global `main`), `.sh` → sh (the body is
//! the entry point). Script sources are cached per path and invalidated
//! when the file's mtime moves.
//!
//! Every failure is reified as a FAILED result. User code can never take
//! the worker process down from here.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::executor::context::ExecutionContext;
use crate::task::{Task, TaskResult};

/// Contract the worker thread pool drives. Implementations must reify every
/// failure into a FAILED result rather than panic.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: &Task, ctx: &ExecutionContext) -> TaskResult;
}

/// Script language, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScriptKind {
    Python,
    Node,
    Shell,
}

impl ScriptKind {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") => Some(ScriptKind::Python),
            Some("js") => Some(ScriptKind::Node),
            Some("sh") => Some(ScriptKind::Shell),
            _ => None,
        }
    }

    fn command(&self) -> &'static str {
        match self {
            ScriptKind::Python => "python3",
            ScriptKind::Node => "node",
            ScriptKind::Shell => "sh",
        }
    }
}

/// Python shim: evaluates the cached source and calls `main(params,
/// context)` or `module().run(params)`.
const PYTHON_BOOTSTRAP: &str = r#"
import json, os, sys

source = os.environ["TASKMILL_SCRIPT_SOURCE"]
path = os.environ.get("TASKMILL_SCRIPT_PATH", "<script>")
request = json.load(sys.stdin)


class Context:
    def __init__(self, raw):
        self.task_id = raw.get("task_id")
        self.worker_id = raw.get("worker_id")


namespace = {}
exec(compile(source, path, "exec"), namespace)
if callable(namespace.get("main")):
    value = namespace["main"](request["params"], Context(request["context"]))
elif callable(namespace.get("module")):
    value = namespace["module"]().run(request["params"])
else:
    raise RuntimeError("script defines neither main(params, context) nor module()")
json.dump(value, sys.stdout)
"#;

/// Node shim: evaluates the cached source and calls the global `main`.
const NODE_BOOTSTRAP: &str = r#"
const fs = require("fs");
const request = JSON.parse(fs.readFileSync(0, "utf8"));
eval(process.env.TASKMILL_SCRIPT_SOURCE);
if (typeof main !== "function") {
    throw new Error("script defines no main(params, context)");
}
const value = main(request.params, request.context);
process.stdout.write(JSON.stringify(value === undefined ? null : value));
"#;

struct CachedScript {
    mtime: SystemTime,
    source: String,
}

/// Internal failure carrying the structured detail for the FAILED result.
struct ExecFailure {
    message: String,
    details: serde_json::Value,
}

impl ExecFailure {
    fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: json!({ "kind": kind }),
        }
    }
}

/// Default executor: one interpreter child process per invocation.
pub struct ScriptExecutor {
    scripts: Mutex<HashMap<PathBuf, CachedScript>>,
    interpreters: Mutex<HashMap<ScriptKind, PathBuf>>,
}

impl ScriptExecutor {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            interpreters: Mutex::new(HashMap::new()),
        }
    }

    /// Load the script source, re-reading the file whenever its mtime
    /// differs from the cached one.
    fn load_source(&self, path: &Path) -> Result<String, ExecFailure> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            ExecFailure::new(
                "script_not_found",
                format!("cannot stat script {}: {e}", path.display()),
            )
        })?;
        let mtime = metadata.modified().map_err(|e| {
            ExecFailure::new("script_not_found", format!("no mtime for script: {e}"))
        })?;

        let mut cache = self.scripts.lock().unwrap();
        if let Some(entry) = cache.get(path) {
            if entry.mtime == mtime {
                return Ok(entry.source.clone());
            }
            debug!(path = %path.display(), "script mtime changed, reloading");
        }

        let source = std::fs::read_to_string(path).map_err(|e| {
            ExecFailure::new(
                "script_unreadable",
                format!("cannot read script {}: {e}", path.display()),
            )
        })?;
        cache.insert(
            path.to_path_buf(),
            CachedScript {
                mtime,
                source: source.clone(),
            },
        );
        Ok(source)
    }

    /// Resolve the interpreter binary for a script kind, cached.
    fn interpreter(&self, kind: ScriptKind) -> Result<PathBuf, ExecFailure> {
        if let Some(path) = self.interpreters.lock().unwrap().get(&kind) {
            return Ok(path.clone());
        }
        let found = which::which(kind.command()).map_err(|e| {
            ExecFailure::new(
                "interpreter_not_found",
                format!("interpreter '{}' not found in PATH: {e}", kind.command()),
            )
        })?;
        debug!(interpreter = %found.display(), "resolved interpreter");
        self.interpreters.lock().unwrap().insert(kind, found.clone());
        Ok(found)
    }

    fn run(&self, task: &Task, ctx: &ExecutionContext) -> Result<serde_json::Value, ExecFailure> {
        let kind = ScriptKind::from_path(&task.script_path).ok_or_else(|| {
            ExecFailure::new(
                "unsupported_script_type",
                format!(
                    "no interpreter registered for {}",
                    task.script_path.display()
                ),
            )
        })?;
        let source = self.load_source(&task.script_path)?;
        let interpreter = self.interpreter(kind)?;

        let mut command = Command::new(&interpreter);
        match kind {
            ScriptKind::Python => {
                command
                    .arg("-c")
                    .arg(PYTHON_BOOTSTRAP)
                    .env("TASKMILL_SCRIPT_SOURCE", &source)
                    .env("TASKMILL_SCRIPT_PATH", &task.script_path);
            }
            ScriptKind::Node => {
                command
                    .arg("-e")
                    .arg(NODE_BOOTSTRAP)
                    .env("TASKMILL_SCRIPT_SOURCE", &source);
            }
            ScriptKind::Shell => {
                command.arg("-c").arg(&source);
            }
        }
        command
            .env("TASKMILL_TASK_ID", &ctx.task_id)
            .env("TASKMILL_WORKER_ID", &ctx.worker_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            ExecFailure::new("spawn_error", format!("failed to spawn interpreter: {e}"))
        })?;

        let request = json!({ "params": task.params, "context": ctx });
        // stdin is dropped right after the write so the script sees EOF.
        // A script may exit without ever reading its input; the resulting
        // broken pipe is not a task failure.
        {
            let stdin = child.stdin.as_mut().ok_or_else(|| {
                ExecFailure::new("spawn_error", "interpreter stdin was not captured")
            })?;
            let _ = stdin.write_all(request.to_string().as_bytes());
        }
        drop(child.stdin.take());

        let output = child.wait_with_output().map_err(|e| {
            ExecFailure::new("spawn_error", format!("failed to collect output: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecFailure {
                message: format!(
                    "script {} exited with {}",
                    task.script_path.display(),
                    output.status
                ),
                details: json!({
                    "kind": "nonzero_exit",
                    "exit_code": output.status.code(),
                    "stderr": stderr.trim(),
                }),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(trimmed)
            .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string())))
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor for ScriptExecutor {
    fn execute(&self, task: &Task, ctx: &ExecutionContext) -> TaskResult {
        let started_at = Utc::now();
        match self.run(task, ctx) {
            Ok(data) => TaskResult::success(&task.id, data, Some(started_at)),
            Err(failure) => {
                warn!(
                    task_id = %task.id,
                    script = %task.script_path.display(),
                    error = %failure.message,
                    "script execution failed"
                );
                TaskResult::failed_with_details(
                    &task.id,
                    failure.message,
                    failure.details,
                    Some(started_at),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskClass;
    use std::fs;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn sh_task(path: &Path) -> Task {
        Task::new(path, json!({}), TaskClass::IoBound)
    }

    #[test]
    fn shell_script_output_becomes_json_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "fixed.sh", "cat > /dev/null\necho '{\"result\": 84}'\n");

        let executor = ScriptExecutor::new();
        let task = sh_task(&path);
        let ctx = ExecutionContext::new(task.id.clone(), "io-0");
        let result = executor.execute(&task, &ctx);

        assert!(result.is_success(), "error: {:?}", result.error);
        assert_eq!(result.data.unwrap()["result"], json!(84));
        assert!(result.started_at.is_some());
    }

    #[test]
    fn context_reaches_the_script_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(
            dir.path(),
            "whoami.sh",
            "cat > /dev/null\nprintf '{\"worker\":\"%s\"}' \"$TASKMILL_WORKER_ID\"\n",
        );

        let executor = ScriptExecutor::new();
        let task = sh_task(&path);
        let ctx = ExecutionContext::new(task.id.clone(), "io-7");
        let result = executor.execute(&task, &ctx);

        assert_eq!(result.data.unwrap()["worker"], json!("io-7"));
    }

    #[test]
    fn nonzero_exit_is_a_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "dies.sh", "echo doomed >&2\nexit 3\n");

        let executor = ScriptExecutor::new();
        let task = sh_task(&path);
        let ctx = ExecutionContext::new(task.id.clone(), "cpu-0");
        let result = executor.execute(&task, &ctx);

        assert!(!result.is_success());
        let details = result.error_details.unwrap();
        assert_eq!(details["kind"], json!("nonzero_exit"));
        assert_eq!(details["exit_code"], json!(3));
        assert_eq!(details["stderr"], json!("doomed"));
    }

    #[test]
    fn missing_script_is_a_failed_result() {
        let executor = ScriptExecutor::new();
        let task = Task::new("/nonexistent/gone.sh", json!({}), TaskClass::CpuBound);
        let ctx = ExecutionContext::new(task.id.clone(), "cpu-0");
        let result = executor.execute(&task, &ctx);

        assert!(!result.is_success());
        assert_eq!(
            result.error_details.unwrap()["kind"],
            json!("script_not_found")
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "blob.bin", "whatever");

        let executor = ScriptExecutor::new();
        let task = sh_task(&path);
        let ctx = ExecutionContext::new(task.id.clone(), "io-0");
        let result = executor.execute(&task, &ctx);

        assert_eq!(
            result.error_details.unwrap()["kind"],
            json!("unsupported_script_type")
        );
    }

    #[test]
    fn mtime_bump_invalidates_the_cached_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "versioned.sh", "echo '{\"version\": 1}'");

        let executor = ScriptExecutor::new();
        let ctx = ExecutionContext::new("t", "io-0");

        let first = executor.execute(&sh_task(&path), &ctx);
        assert_eq!(first.data.unwrap()["version"], json!(1));

        fs::write(&path, "echo '{\"version\": 2}'").unwrap();
        // Push the mtime well past filesystem timestamp granularity.
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();

        let second = executor.execute(&sh_task(&path), &ctx);
        assert_eq!(second.data.unwrap()["version"], json!(2));
    }

    #[test]
    fn plain_text_output_is_carried_as_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "plain.sh", "echo not json at all");

        let executor = ScriptExecutor::new();
        let task = sh_task(&path);
        let ctx = ExecutionContext::new(task.id.clone(), "io-0");
        let result = executor.execute(&task, &ctx);

        assert_eq!(result.data.unwrap(), json!("not json at all"));
    }
}

// packages/engine/src/worker/process.rs
//! Parent-side handle to one worker child process
//!
//! Owns the two IPC legs to the child: the command pipe (child stdin,
//! guarded by a mutex so dispatcher threads serialize their writes) and the
//! child's outbound stream (stdout), demultiplexed by a dedicated reader
//! task: status replies go to the status channel, result envelopes go to
//! the shared output queue. The reader also does crash detection: EOF with
//! tasks still in flight fabricates a FAILED result for each so no
//! submission is left without an outcome.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::queue::OutputQueue;
use crate::task::{Task, TaskClass, TaskResult};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use crate::worker::protocol::{CommandEnvelope, StatusReply};

/// Cap on one status round-trip. A worker that cannot answer inside this
/// budget reports as load 0 and still receives work, so a wedged worker
/// surfaces instead of hiding.
const STATUS_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Id field probe for result lines passing through the demux.
#[derive(serde::Deserialize)]
struct ResultProbe {
    task_id: String,
}

/// Parent-side view of one worker child.
pub struct WorkerHandle {
    worker_id: String,
    class: TaskClass,
    pid: u32,
    cmd_pipe: Mutex<ChildStdin>,
    status_rx: Mutex<mpsc::Receiver<u32>>,
    child: Mutex<Option<Child>>,
    healthy: Arc<AtomicBool>,
    in_flight: Arc<StdMutex<HashSet<String>>>,
}

impl WorkerHandle {
    /// Spawn the worker child and wire up its pipes.
    pub async fn spawn(
        worker_id: String,
        class: TaskClass,
        threads: usize,
        config: &EngineConfig,
        output_queue: Arc<OutputQueue>,
    ) -> Result<Arc<Self>> {
        let binary = resolve_worker_binary(config)?;
        debug!(worker_id = %worker_id, binary = %binary.display(), threads, "spawning worker");

        let mut child = Command::new(&binary)
            .arg("--worker-id")
            .arg(&worker_id)
            .arg("--threads")
            .arg(threads.to_string())
            .arg("--channel-capacity")
            .arg(config.worker_channel_capacity.to_string())
            .arg("--log-level")
            .arg(&config.log_level)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::SpawnFailed(format!("{}: {e}", binary.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::SpawnFailed("worker stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::SpawnFailed("worker stdout was not captured".into()))?;
        let pid = child.id().unwrap_or(0);

        let (status_tx, status_rx) = mpsc::channel(16);
        let healthy = Arc::new(AtomicBool::new(true));
        let in_flight = Arc::new(StdMutex::new(HashSet::new()));

        tokio::spawn(reader_loop(
            worker_id.clone(),
            stdout,
            status_tx,
            output_queue,
            Arc::clone(&healthy),
            Arc::clone(&in_flight),
        ));

        Ok(Arc::new(Self {
            worker_id,
            class,
            pid,
            cmd_pipe: Mutex::new(stdin),
            status_rx: Mutex::new(status_rx),
            child: Mutex::new(Some(child)),
            healthy,
            in_flight,
        }))
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn class(&self) -> TaskClass {
        self.class
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the child's outbound stream is still open.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Signal-0 probe of the child process.
    pub fn is_alive(&self) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        self.pid != 0 && kill(Pid::from_raw(self.pid as i32), None).is_ok()
    }

    /// Dispatch a task over the command pipe.
    pub async fn submit(&self, task: &Task) -> Result<()> {
        if !self.is_healthy() {
            return Err(EngineError::WorkerUnreachable {
                worker_id: self.worker_id.clone(),
            });
        }
        let line = serde_json::to_string(&CommandEnvelope::execute(task.to_envelope()))?;

        self.in_flight.lock().unwrap().insert(task.id.clone());
        if let Err(e) = self.write_line(&line).await {
            self.in_flight.lock().unwrap().remove(&task.id);
            self.healthy.store(false, Ordering::Relaxed);
            warn!(worker_id = %self.worker_id, error = %e, "command pipe write failed");
            return Err(EngineError::WorkerUnreachable {
                worker_id: self.worker_id.clone(),
            });
        }
        Ok(())
    }

    /// Live load report: synchronous get_status round-trip, bounded by
    /// `STATUS_POLL_TIMEOUT`. Timeout or any pipe error reads as 0.
    pub async fn active_thread_count(&self) -> u32 {
        let mut rx = self.status_rx.lock().await;
        // Discard replies from earlier polls that timed out after the
        // worker answered.
        while rx.try_recv().is_ok() {}

        let line = match serde_json::to_string(&CommandEnvelope::get_status()) {
            Ok(line) => line,
            Err(_) => return 0,
        };
        if self.write_line(&line).await.is_err() {
            self.healthy.store(false, Ordering::Relaxed);
            return 0;
        }

        match tokio::time::timeout(STATUS_POLL_TIMEOUT, rx.recv()).await {
            Ok(Some(count)) => count,
            Ok(None) => 0,
            Err(_) => {
                debug!(worker_id = %self.worker_id, "status poll timed out");
                0
            }
        }
    }

    /// Stop the child. Graceful sends `stop` and waits out the grace
    /// interval before killing; forced kills immediately.
    pub async fn stop(&self, graceful: bool, grace: Duration) {
        if graceful {
            if let Ok(line) = serde_json::to_string(&CommandEnvelope::stop()) {
                let _ = self.write_line(&line).await;
            }
        }

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if graceful {
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        debug!(worker_id = %self.worker_id, %status, "worker exited");
                        return;
                    }
                    Ok(Err(e)) => warn!(worker_id = %self.worker_id, error = %e, "wait failed"),
                    Err(_) => {
                        warn!(worker_id = %self.worker_id, "worker ignored stop, killing")
                    }
                }
            }
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    /// Tasks dispatched to this worker whose results have not come back.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut stdin = self.cmd_pipe.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }
}

/// Demux the child's outbound stream until EOF, then run crash detection.
async fn reader_loop(
    worker_id: String,
    stdout: ChildStdout,
    status_tx: mpsc::Sender<u32>,
    output_queue: Arc<OutputQueue>,
    healthy: Arc<AtomicBool>,
    in_flight: Arc<StdMutex<HashSet<String>>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(reply) = serde_json::from_str::<StatusReply>(&line) {
            let _ = status_tx.try_send(reply.active_threads);
            continue;
        }
        match serde_json::from_str::<ResultProbe>(&line) {
            Ok(probe) => {
                in_flight.lock().unwrap().remove(&probe.task_id);
            }
            Err(e) => {
                warn!(%worker_id, error = %e, "unrecognized line from worker");
                continue;
            }
        }
        if !output_queue.put(line) {
            warn!(%worker_id, "output queue full, result dropped");
        }
    }

    // EOF: clean exit after a drain, or a crash. Either way the worker is
    // gone; every task still marked in flight gets a FAILED result so its
    // submitter is not left waiting forever.
    healthy.store(false, Ordering::Relaxed);
    let orphaned: Vec<String> = {
        let mut set = in_flight.lock().unwrap();
        set.drain().collect()
    };
    if !orphaned.is_empty() {
        warn!(
            %worker_id,
            orphaned = orphaned.len(),
            "worker exited with tasks in flight"
        );
        for task_id in orphaned {
            let result = TaskResult::failed_with_details(
                &task_id,
                format!("worker {worker_id} exited before completing the task"),
                json!({ "kind": "worker_exited", "worker_id": worker_id }),
                None,
            );
            match serde_json::to_string(&result) {
                Ok(line) => {
                    if !output_queue.put(line) {
                        warn!(%worker_id, %task_id, "output queue full, crash result dropped");
                    }
                }
                Err(e) => warn!(%task_id, error = %e, "crash result unserializable"),
            }
        }
    }
    debug!(%worker_id, "reader task finished");
}

/// Locate the `taskmill-worker` binary: explicit config, then the
/// `TASKMILL_WORKER_BIN` environment variable, then next to the current
/// executable (and one directory up, for test binaries under `deps/`),
/// then `$PATH`.
fn resolve_worker_binary(config: &EngineConfig) -> Result<PathBuf> {
    if let Some(path) = &config.worker_binary {
        return Ok(path.clone());
    }
    if let Ok(path) = std::env::var("TASKMILL_WORKER_BIN") {
        return Ok(PathBuf::from(path));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("taskmill-worker");
            if sibling.exists() {
                return Ok(sibling);
            }
            if let Some(parent) = dir.parent() {
                let above = parent.join("taskmill-worker");
                if above.exists() {
                    return Ok(above);
                }
            }
        }
    }
    which::which("taskmill-worker")
        .map_err(|e| EngineError::SpawnFailed(format!("taskmill-worker not found: {e}")))
}

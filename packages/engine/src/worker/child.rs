// packages/engine/src/worker/child.rs
//! Worker child process main loop
//!
//! Entry point of the `taskmill-worker` binary. One dedicated command
//! thread blocks on stdin; `execute_task` envelopes are forwarded into the
//! thread pool, `get_status` answers with the live active-thread count, and
//! `stop` (or stdin EOF, meaning the engine went away) drains the pool and
//! exits. stdout carries the outbound protocol, so all logging goes to
//! stderr.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::executor::{ScriptExecutor, TaskExecutor};
use crate::observability::init_worker_tracing;
use crate::worker::protocol::{Command, CommandEnvelope, StatusReply};
use crate::worker::thread_pool::{ResultSink, ThreadPool};

/// Grace interval for draining the thread pool on stop.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Options parsed from the worker binary's command line.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: String,
    pub threads: usize,
    pub channel_capacity: usize,
    pub log_level: String,
}

/// Line-atomic writer for the child's outbound stream.
struct StdoutSink {
    out: Mutex<io::Stdout>,
}

impl StdoutSink {
    fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
        }
    }
}

impl ResultSink for StdoutSink {
    fn deliver(&self, envelope: String) -> io::Result<()> {
        let mut out = self.out.lock().unwrap();
        out.write_all(envelope.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

/// Run the worker until stopped. Returns once the pool has drained.
pub fn run(options: WorkerOptions) -> io::Result<()> {
    init_worker_tracing(&options.log_level);
    info!(
        worker_id = %options.worker_id,
        threads = options.threads,
        "worker process starting"
    );

    let sink: Arc<StdoutSink> = Arc::new(StdoutSink::new());
    let executor: Arc<dyn TaskExecutor> = Arc::new(ScriptExecutor::new());
    let pool = ThreadPool::new(
        options.threads,
        options.channel_capacity,
        &options.worker_id,
        executor,
        Arc::clone(&sink) as Arc<dyn ResultSink>,
    );

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope: CommandEnvelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "discarding undecodable command");
                continue;
            }
        };
        match envelope.command {
            Command::ExecuteTask => {
                let Some(task) = envelope.task else {
                    warn!("execute_task without a task payload");
                    continue;
                };
                match serde_json::to_string(&task) {
                    Ok(serialized) => {
                        if !pool.submit(serialized) {
                            warn!(task_id = %task.task_id, "pool rejected task during shutdown");
                        }
                    }
                    Err(e) => warn!(task_id = %task.task_id, error = %e, "task re-serialization failed"),
                }
            }
            Command::GetStatus => {
                let reply = StatusReply {
                    active_threads: pool.active_count() as u32,
                };
                let line = serde_json::to_string(&reply).expect("status reply serializes");
                if sink.deliver(line).is_err() {
                    // Engine closed our stdout; nothing left to report to.
                    break;
                }
            }
            Command::Stop => {
                info!(worker_id = %options.worker_id, "stop command received");
                break;
            }
        }
    }

    info!(worker_id = %options.worker_id, "draining thread pool");
    pool.shutdown(STOP_GRACE);
    info!(worker_id = %options.worker_id, "worker process exiting");
    Ok(())
}

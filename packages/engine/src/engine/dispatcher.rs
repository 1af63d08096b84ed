// packages/engine/src/engine/dispatcher.rs
//! Dispatcher thread set
//!
//! K symmetric, stateless tasks draining the input queue and handing each
//! deserialized task to the process pool. Ordering across dispatcher
//! threads is deliberately unordered; within one thread draws are FIFO.
//! Submission order is not preserved globally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::queue::InputQueue;
use crate::task::TaskEnvelope;
use crate::worker::ProcessPool;

pub struct Dispatcher {
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn `count` dispatch loops.
    ///
    /// `shutdown` asks the loops to exit once the queue is drained; `force`
    /// makes them exit at the next draw regardless.
    pub fn start(
        count: usize,
        input: Arc<InputQueue>,
        pool: Arc<ProcessPool>,
        shutdown: Arc<AtomicBool>,
        force: Arc<AtomicBool>,
        poll_timeout: Duration,
    ) -> Self {
        let handles = (0..count)
            .map(|index| {
                let input = Arc::clone(&input);
                let pool = Arc::clone(&pool);
                let shutdown = Arc::clone(&shutdown);
                let force = Arc::clone(&force);
                tokio::spawn(dispatch_loop(
                    index,
                    input,
                    pool,
                    shutdown,
                    force,
                    poll_timeout,
                ))
            })
            .collect();
        Self { handles }
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every loop to exit, aborting stragglers at the deadline.
    /// Returns `false` when anything had to be aborted.
    pub async fn join(self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        let mut clean = true;
        for mut handle in self.handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                clean = false;
            }
        }
        if !clean {
            warn!("dispatcher threads aborted at shutdown deadline");
        }
        clean
    }
}

async fn dispatch_loop(
    index: usize,
    input: Arc<InputQueue>,
    pool: Arc<ProcessPool>,
    shutdown: Arc<AtomicBool>,
    force: Arc<AtomicBool>,
    poll_timeout: Duration,
) {
    debug!(index, "dispatcher started");
    loop {
        if force.load(Ordering::Relaxed) {
            break;
        }
        match input.get(poll_timeout).await {
            Some(line) => match serde_json::from_str::<TaskEnvelope>(&line) {
                Ok(envelope) => {
                    if let Err(e) = pool.submit(envelope.into_task()).await {
                        warn!(index, error = %e, "dispatch failed");
                    }
                }
                Err(e) => warn!(index, error = %e, "discarding undecodable task envelope"),
            },
            None => {
                if shutdown.load(Ordering::Relaxed) && input.is_empty() {
                    break;
                }
            }
        }
    }
    debug!(index, "dispatcher exiting");
}

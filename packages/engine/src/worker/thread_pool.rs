// packages/engine/src/worker/thread_pool.rs
//! Executor thread pool inside a worker process
//!
//! A fixed set of OS threads draining a bounded channel of serialized task
//! envelopes. Each thread deserializes the task, runs the executor, and
//! hands the serialized result to the `ResultSink` (in a real worker, the
//! stdout writer back to the engine). The live `active_count` is what the
//! worker reports to `get_status` polls and is the signal the least-loaded
//! balancer routes on.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::executor::{ExecutionContext, TaskExecutor};
use crate::task::{TaskEnvelope, TaskResult};

/// Where finished results go. The worker child points this at stdout; tests
/// point it at a buffer.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, envelope: String) -> io::Result<()>;
}

/// Wake interval for blocked executor threads to observe the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed-size executor pool.
pub struct ThreadPool {
    sender: Mutex<Option<Sender<String>>>,
    active: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    pub fn new(
        threads: usize,
        channel_capacity: usize,
        worker_id: &str,
        executor: Arc<dyn TaskExecutor>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (sender, receiver) = bounded::<String>(channel_capacity);
        let active = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(threads);
        for thread_index in 0..threads {
            let receiver = receiver.clone();
            let worker_id = worker_id.to_string();
            let executor = Arc::clone(&executor);
            let sink = Arc::clone(&sink);
            let active = Arc::clone(&active);
            let stop = Arc::clone(&stop);

            let handle = thread::Builder::new()
                .name(format!("{worker_id}-exec-{thread_index}"))
                .spawn(move || executor_loop(receiver, worker_id, executor, sink, active, stop))
                .expect("failed to spawn executor thread");
            handles.push(handle);
        }

        debug!(threads, channel_capacity, "thread pool started");
        Self {
            sender: Mutex::new(Some(sender)),
            active,
            stop,
            handles: Mutex::new(handles),
        }
    }

    /// Queue one serialized task envelope. Blocks while the channel is at
    /// capacity; `false` once the pool is shutting down.
    pub fn submit(&self, envelope: String) -> bool {
        let guard = self.sender.lock().unwrap();
        match guard.as_ref() {
            Some(sender) => sender.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Threads currently inside the executor. Cheap atomic snapshot.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Envelopes queued but not yet picked up.
    pub fn queued_count(&self) -> usize {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Drain outstanding work and join the threads, up to `grace`. Threads
    /// still running after the grace interval are force-stopped at their
    /// next poll wake and left to the OS if they ignore that too.
    pub fn shutdown(&self, grace: Duration) {
        // Dropping the sender lets the threads drain the channel and then
        // observe the disconnect.
        self.sender.lock().unwrap().take();

        let deadline = Instant::now() + grace;
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        while Instant::now() < deadline && handles.iter().any(|h| !h.is_finished()) {
            thread::sleep(Duration::from_millis(10));
        }

        if handles.iter().any(|h| !h.is_finished()) {
            warn!("executor threads still busy after grace, forcing stop");
            self.stop.store(true, Ordering::SeqCst);
        }
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

fn executor_loop(
    receiver: Receiver<String>,
    worker_id: String,
    executor: Arc<dyn TaskExecutor>,
    sink: Arc<dyn ResultSink>,
    active: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(envelope) => run_one(&envelope, &worker_id, &*executor, &*sink, &active),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_one(
    envelope: &str,
    worker_id: &str,
    executor: &dyn TaskExecutor,
    sink: &dyn ResultSink,
    active: &AtomicUsize,
) {
    let task = match serde_json::from_str::<TaskEnvelope>(envelope) {
        Ok(envelope) => envelope.into_task(),
        Err(e) => {
            // No task id to report against; nothing to do but log.
            warn!(error = %e, "discarding undecodable task envelope");
            return;
        }
    };

    active.fetch_add(1, Ordering::SeqCst);
    let ctx = ExecutionContext::new(task.id.clone(), worker_id);
    let result = executor.execute(&task, &ctx);
    active.fetch_sub(1, Ordering::SeqCst);

    publish(result, sink);
}

/// Push a result to the sink; on failure fabricate a FAILED result and try
/// once more, then log and drop.
fn publish(result: TaskResult, sink: &dyn ResultSink) {
    let task_id = result.task_id.clone();
    let started_at = result.started_at;

    let first_error = match serde_json::to_string(&result) {
        Ok(line) => match sink.deliver(line) {
            Ok(()) => return,
            Err(e) => format!("failed to publish result: {e}"),
        },
        Err(e) => format!("failed to serialize result: {e}"),
    };

    warn!(%task_id, error = %first_error, "publishing fallback FAILED result");
    let fallback = TaskResult::failed(&task_id, first_error, started_at);
    match serde_json::to_string(&fallback) {
        Ok(line) => {
            if sink.deliver(line).is_err() {
                warn!(%task_id, "result dropped, sink is unavailable");
            }
        }
        Err(e) => warn!(%task_id, error = %e, "result dropped, fallback unserializable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskClass, TaskStatus};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    /// Executor that never touches the filesystem.
    struct EchoExecutor {
        delay: Duration,
    }

    impl TaskExecutor for EchoExecutor {
        fn execute(&self, task: &Task, ctx: &ExecutionContext) -> TaskResult {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            TaskResult::success(
                &task.id,
                json!({ "echo": task.params, "worker": ctx.worker_id }),
                None,
            )
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        lines: Mutex<Vec<String>>,
    }

    impl ResultSink for CollectingSink {
        fn deliver(&self, envelope: String) -> io::Result<()> {
            self.lines.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    fn envelope_for(task: &Task) -> String {
        serde_json::to_string(&task.to_envelope()).unwrap()
    }

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn executes_and_publishes_every_task() {
        let sink = Arc::new(CollectingSink::default());
        let pool = ThreadPool::new(
            4,
            64,
            "io-0",
            Arc::new(EchoExecutor {
                delay: Duration::ZERO,
            }),
            Arc::clone(&sink) as Arc<dyn ResultSink>,
        );

        let tasks: Vec<Task> = (0..20)
            .map(|i| Task::new("/tmp/x.sh", json!({ "i": i }), TaskClass::IoBound))
            .collect();
        for task in &tasks {
            assert!(pool.submit(envelope_for(task)));
        }

        assert!(wait_for(
            || sink.lines.lock().unwrap().len() == tasks.len(),
            Duration::from_secs(5)
        ));
        assert_eq!(pool.active_count(), 0);

        let mut seen: Vec<String> = sink
            .lines
            .lock()
            .unwrap()
            .iter()
            .map(|l| serde_json::from_str::<TaskResult>(l).unwrap().task_id)
            .collect();
        seen.sort();
        let mut expected: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        expected.sort();
        assert_eq!(seen, expected);

        pool.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn active_count_tracks_running_threads() {
        let sink = Arc::new(CollectingSink::default());
        let pool = ThreadPool::new(
            2,
            64,
            "io-1",
            Arc::new(EchoExecutor {
                delay: Duration::from_millis(300),
            }),
            Arc::clone(&sink) as Arc<dyn ResultSink>,
        );

        for _ in 0..2 {
            let task = Task::new("/tmp/x.sh", json!({}), TaskClass::IoBound);
            pool.submit(envelope_for(&task));
        }

        assert!(wait_for(|| pool.active_count() == 2, Duration::from_secs(2)));
        assert!(wait_for(|| pool.active_count() == 0, Duration::from_secs(2)));
        pool.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn shutdown_drains_queued_work() {
        let sink = Arc::new(CollectingSink::default());
        let pool = ThreadPool::new(
            1,
            64,
            "cpu-0",
            Arc::new(EchoExecutor {
                delay: Duration::from_millis(20),
            }),
            Arc::clone(&sink) as Arc<dyn ResultSink>,
        );

        for i in 0..10 {
            let task = Task::new("/tmp/x.sh", json!({ "i": i }), TaskClass::CpuBound);
            pool.submit(envelope_for(&task));
        }
        pool.shutdown(Duration::from_secs(5));

        assert_eq!(sink.lines.lock().unwrap().len(), 10);
        assert!(!pool.submit("{}".into()), "submit after shutdown must fail");
    }

    #[test]
    fn sink_failure_falls_back_to_failed_result() {
        /// Fails the first delivery of each task, accepts the fallback.
        struct FlakySink {
            failures: AtomicU32,
            inner: CollectingSink,
        }

        impl ResultSink for FlakySink {
            fn deliver(&self, envelope: String) -> io::Result<()> {
                if self.failures.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
                }
                self.inner.deliver(envelope)
            }
        }

        let sink = Arc::new(FlakySink {
            failures: AtomicU32::new(0),
            inner: CollectingSink::default(),
        });
        let pool = ThreadPool::new(
            1,
            8,
            "cpu-0",
            Arc::new(EchoExecutor {
                delay: Duration::ZERO,
            }),
            Arc::clone(&sink) as Arc<dyn ResultSink>,
        );

        let task = Task::new("/tmp/x.sh", json!({}), TaskClass::CpuBound);
        pool.submit(envelope_for(&task));
        pool.shutdown(Duration::from_secs(2));

        let lines = sink.inner.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        let fallback: TaskResult = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(fallback.task_id, task.id);
        assert_eq!(fallback.status, TaskStatus::Failed);
    }

    #[test]
    fn undecodable_envelope_is_dropped_quietly() {
        let sink = Arc::new(CollectingSink::default());
        let pool = ThreadPool::new(
            1,
            8,
            "cpu-0",
            Arc::new(EchoExecutor {
                delay: Duration::ZERO,
            }),
            Arc::clone(&sink) as Arc<dyn ResultSink>,
        );

        pool.submit("this is not json".into());
        let task = Task::new("/tmp/x.sh", json!({}), TaskClass::CpuBound);
        pool.submit(envelope_for(&task));
        pool.shutdown(Duration::from_secs(2));

        assert_eq!(sink.lines.lock().unwrap().len(), 1);
    }
}

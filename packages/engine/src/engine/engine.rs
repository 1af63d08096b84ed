// packages/engine/src/engine/engine.rs
//! Engine façade
//!
//! The public control point: start and stop the system, submit tasks,
//! collect results, observe status. Everything between submission and
//! collection is asynchronous and unordered; callers identify results by
//! task id.
//!
//! Lock ordering is pending-tasks mutex, then a cache-shard mutex, then a
//! command-pipe mutex. No path acquires them in any other order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::engine::dispatcher::Dispatcher;
use crate::engine::sharded_cache::ShardedResultCache;
use crate::queue::{InputQueue, OutputQueue};
use crate::status::{ComponentStatus, HealthSignals, SystemHealth, SystemStatus};
use crate::task::{Task, TaskResult};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use crate::worker::ProcessPool;

/// Components alive between `start` and `shutdown`.
struct Running {
    input: Arc<InputQueue>,
    output: Arc<OutputQueue>,
    cache: Arc<ShardedResultCache>,
    pool: Arc<ProcessPool>,
    dispatcher: StdMutex<Option<Dispatcher>>,
    shutdown: Arc<AtomicBool>,
    force: Arc<AtomicBool>,
}

/// The task-execution engine.
pub struct Engine {
    config: EngineConfig,
    state: RwLock<Option<Arc<Running>>>,
    pending: StdMutex<HashMap<String, Task>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
            pending: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bring the system up: queues, cache, worker pool, dispatchers.
    /// Fails with `AlreadyRunning` if started twice.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        self.config.validate()?;

        let input = Arc::new(InputQueue::new(self.config.input_queue_size));
        let output = Arc::new(OutputQueue::new(self.config.output_queue_size));
        let cache = Arc::new(ShardedResultCache::new(
            self.config.shard_count,
            self.config.max_results_per_shard,
        )?);
        let pool = Arc::new(ProcessPool::start(&self.config, Arc::clone(&output)).await?);

        let shutdown = Arc::new(AtomicBool::new(false));
        let force = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher::start(
            self.config.queue_thread_count,
            Arc::clone(&input),
            Arc::clone(&pool),
            Arc::clone(&shutdown),
            Arc::clone(&force),
            self.config.queue_poll_timeout(),
        );

        *state = Some(Arc::new(Running {
            input,
            output,
            cache,
            pool,
            dispatcher: StdMutex::new(Some(dispatcher)),
            shutdown,
            force,
        }));
        info!(
            dispatchers = self.config.queue_thread_count,
            "engine started"
        );
        Ok(())
    }

    /// Wind the system down. Graceful lets dispatchers drain the input
    /// queue and workers finish their channels within the grace interval;
    /// forced kills stragglers immediately. A stopped engine is a no-op.
    pub async fn shutdown(&self, graceful: bool) -> Result<()> {
        let running = {
            let mut state = self.state.write().await;
            match state.take() {
                Some(running) => running,
                None => return Ok(()),
            }
        };

        info!(graceful, "engine shutting down");
        running.shutdown.store(true, Ordering::Relaxed);
        if !graceful {
            running.force.store(true, Ordering::Relaxed);
        }

        let grace = self.config.shutdown_timeout();
        let dispatcher = running.dispatcher.lock().unwrap().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.join(grace).await;
        }
        running.pool.shutdown(graceful, grace).await;
        info!("engine stopped");
        Ok(())
    }

    /// Whether `start` has been called and `shutdown` has not.
    pub async fn is_running(&self) -> bool {
        self.state.read().await.is_some()
    }

    async fn running(&self) -> Result<Arc<Running>> {
        self.state
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(EngineError::NotRunning)
    }

    /// Submit a task for execution. Returns its id.
    ///
    /// A full input queue is retried up to the configured budget with a
    /// short linear backoff, then reported as `QueueFull`. Backpressure is
    /// a return value here, never a panic.
    pub async fn submit_task(&self, task: Task) -> Result<String> {
        let running = self.running().await?;
        let task_id = task.id.clone();
        let envelope = serde_json::to_string(&task.to_envelope())?;

        self.pending
            .lock()
            .unwrap()
            .insert(task_id.clone(), task);

        let mut attempts = 0u32;
        loop {
            if running.input.put(envelope.clone()) {
                return Ok(task_id);
            }
            if attempts >= self.config.max_queue_full_retries {
                self.pending.lock().unwrap().remove(&task_id);
                return Err(EngineError::QueueFull {
                    attempts: attempts + 1,
                });
            }
            attempts += 1;
            tokio::time::sleep(Duration::from_millis(10 * attempts as u64)).await;
        }
    }

    /// Collect the result for `task_id`, waiting up to `timeout`.
    ///
    /// Checks the cache first, then drains the output queue in bounded
    /// polls; results for other tasks are routed into the cache for their
    /// own collectors. `Ok(None)` on timeout; the task stays pending and
    /// its result, when it lands, waits in the cache.
    pub async fn get_result(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<Option<TaskResult>> {
        let running = self.running().await?;

        if let Some(result) = running.cache.get(task_id) {
            self.pending.lock().unwrap().remove(task_id);
            return Ok(Some(result));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let poll = std::cmp::min(deadline - now, self.config.queue_poll_timeout());

            match running.output.get(poll).await {
                Some(line) => {
                    let result: TaskResult = match serde_json::from_str(&line) {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(error = %e, "discarding undecodable result envelope");
                            continue;
                        }
                    };
                    if result.task_id == task_id {
                        self.pending.lock().unwrap().remove(task_id);
                        return Ok(Some(result));
                    }
                    let other_id = result.task_id.clone();
                    running.cache.put(&other_id, result);
                }
                None => {}
            }

            // A concurrent collector may have drained our result into the
            // cache while we were blocked on the queue.
            if let Some(result) = running.cache.get(task_id) {
                self.pending.lock().unwrap().remove(task_id);
                return Ok(Some(result));
            }
        }
    }

    /// Tasks submitted whose results have not been delivered yet.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Aggregated snapshot of every component. Safe to call concurrently
    /// with submissions and collections.
    pub async fn get_status(&self) -> SystemStatus {
        let mut components = std::collections::BTreeMap::new();
        let state = self.state.read().await;
        if let Some(running) = state.as_ref() {
            components.insert("input_queue".to_string(), running.input.status());
            components.insert("output_queue".to_string(), running.output.status());
            components.insert("result_cache".to_string(), running.cache.status());
            components.insert("process_pool".to_string(), running.pool.status().await);
        }
        SystemStatus {
            is_running: state.is_some(),
            pending_count: self.pending_count(),
            components,
        }
    }

    pub async fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        let state = self.state.read().await;
        let running = state.as_ref()?;
        match name {
            "input_queue" => Some(running.input.status()),
            "output_queue" => Some(running.output.status()),
            "result_cache" => Some(running.cache.status()),
            "process_pool" => Some(running.pool.status().await),
            _ => None,
        }
    }

    /// Admission-control verdict from the engine's own signals.
    pub async fn get_health(&self) -> SystemHealth {
        let state = self.state.read().await;
        match state.as_ref() {
            Some(running) => HealthSignals {
                input_fullness: running.input.fullness(),
                total_dropped: running.input.total_dropped(),
                dead_workers: running.pool.dead_workers(),
                total_workers: running.pool.total_workers(),
            }
            .verdict(),
            None => SystemHealth::Critical,
        }
    }

    /// Scoped run: start, hand the engine to `f`, then shut down
    /// gracefully, also when `f` returns early.
    pub async fn run_with<F, Fut, T>(config: EngineConfig, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Engine>) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let engine = Arc::new(Engine::new(config));
        engine.start().await?;
        let output = f(Arc::clone(&engine)).await;
        engine.shutdown(true).await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskClass;
    use serde_json::json;

    #[tokio::test]
    async fn submit_before_start_is_rejected() {
        let engine = Engine::new(EngineConfig::default());
        let task = Task::new("/tmp/x.sh", json!({}), TaskClass::IoBound);
        assert!(matches!(
            engine.submit_task(task).await,
            Err(EngineError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn get_result_before_start_is_rejected() {
        let engine = Engine::new(EngineConfig::default());
        assert!(matches!(
            engine.get_result("nope", Duration::from_millis(1)).await,
            Err(EngineError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn shutdown_when_stopped_is_a_noop() {
        let engine = Engine::new(EngineConfig::default());
        assert!(engine.shutdown(true).await.is_ok());
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn status_of_stopped_engine_is_empty() {
        let engine = Engine::new(EngineConfig::default());
        let status = engine.get_status().await;
        assert!(!status.is_running);
        assert_eq!(status.pending_count, 0);
        assert!(status.components.is_empty());
        assert_eq!(engine.get_health().await, SystemHealth::Critical);
    }
}

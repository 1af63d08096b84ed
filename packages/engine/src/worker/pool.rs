// packages/engine/src/worker/pool.rs
//! Process pool and least-loaded routing
//!
//! Two fixed groups of worker processes, one per task class. Routing asks
//! every worker in the group for its live active-thread count over IPC and
//! dispatches to the minimum, lowest index winning ties. Live reports are
//! preferred over parent-held shadow counters: tasks are long-lived in the
//! children and a shadow counter would drift within seconds.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::queue::OutputQueue;
use crate::status::{ComponentStatus, HEALTHY, UNHEALTHY};
use crate::task::{Task, TaskClass, TaskResult};
use crate::utils::config::EngineConfig;
use crate::utils::errors::Result;
use crate::worker::process::WorkerHandle;

/// The CPU and I/O worker groups.
pub struct ProcessPool {
    cpu_workers: Vec<Arc<WorkerHandle>>,
    io_workers: Vec<Arc<WorkerHandle>>,
    output_queue: Arc<OutputQueue>,
}

impl ProcessPool {
    /// Spawn both worker groups. Worker ids are assigned from one counter
    /// across the groups ("cpu-0", "io-1", "io-2", ...).
    pub async fn start(config: &EngineConfig, output_queue: Arc<OutputQueue>) -> Result<Self> {
        let mut counter = 0usize;

        let mut cpu_workers = Vec::with_capacity(config.cpu_bound_count);
        for _ in 0..config.cpu_bound_count {
            let worker_id = format!("cpu-{counter}");
            counter += 1;
            cpu_workers.push(
                WorkerHandle::spawn(
                    worker_id,
                    TaskClass::CpuBound,
                    config.cpu_bound_task_limit,
                    config,
                    Arc::clone(&output_queue),
                )
                .await?,
            );
        }

        let io_count = config.resolved_io_bound_count();
        let mut io_workers = Vec::with_capacity(io_count);
        for _ in 0..io_count {
            let worker_id = format!("io-{counter}");
            counter += 1;
            io_workers.push(
                WorkerHandle::spawn(
                    worker_id,
                    TaskClass::IoBound,
                    config.io_bound_task_limit,
                    config,
                    Arc::clone(&output_queue),
                )
                .await?,
            );
        }

        info!(
            cpu_workers = cpu_workers.len(),
            io_workers = io_workers.len(),
            "process pool started"
        );
        Ok(Self {
            cpu_workers,
            io_workers,
            output_queue,
        })
    }

    fn group(&self, class: TaskClass) -> &[Arc<WorkerHandle>] {
        match class {
            TaskClass::CpuBound => &self.cpu_workers,
            TaskClass::IoBound => &self.io_workers,
        }
    }

    /// Route a task to the least-loaded worker of its class.
    ///
    /// Load is the live-reported active thread count plus the tasks this
    /// parent has dispatched to the worker and not yet seen results for
    /// (its channel backlog). The report alone saturates at the thread
    /// limit, so under a burst every probe would tie and the tie-break
    /// would pour the whole backlog onto one worker. A status timeout
    /// still reads the reported part as 0.
    ///
    /// Dispatch failures walk to the next best candidate; if the whole
    /// group is unreachable the task is failed into the output queue so its
    /// submitter still gets an outcome.
    pub async fn submit(&self, task: Task) -> Result<()> {
        let workers = self.group(task.class);

        // Probe healthy workers; if the whole group looks dead probe all of
        // them anyway so the failure is observed, not assumed.
        let mut indices: Vec<usize> = (0..workers.len())
            .filter(|&i| workers[i].is_healthy())
            .collect();
        if indices.is_empty() {
            indices = (0..workers.len()).collect();
        }

        let mut candidates = Vec::with_capacity(indices.len());
        for i in indices {
            let reported = workers[i].active_thread_count().await as usize;
            let backlog = workers[i].in_flight_count().saturating_sub(reported);
            candidates.push((reported + backlog, i));
        }

        while !candidates.is_empty() {
            // Strict minimum on (load, index): lowest index wins ties.
            let position = candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, &(load, index))| (load, index))
                .map(|(position, _)| position)
                .expect("candidates is non-empty");
            let (_, index) = candidates.swap_remove(position);
            let worker = &workers[index];

            match worker.submit(&task).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        worker_id = worker.worker_id(),
                        task_id = %task.id,
                        error = %e,
                        "dispatch failed, trying next worker"
                    );
                }
            }
        }

        warn!(task_id = %task.id, "no reachable worker in group, failing task");
        let result = TaskResult::failed_with_details(
            &task.id,
            "no reachable worker available for dispatch",
            json!({ "kind": "worker_unreachable" }),
            None,
        );
        let line = serde_json::to_string(&result)?;
        if !self.output_queue.put(line) {
            warn!(task_id = %task.id, "output queue full, dispatch failure dropped");
        }
        Ok(())
    }

    pub fn total_workers(&self) -> usize {
        self.cpu_workers.len() + self.io_workers.len()
    }

    pub fn dead_workers(&self) -> usize {
        self.cpu_workers
            .iter()
            .chain(&self.io_workers)
            .filter(|w| !w.is_healthy())
            .count()
    }

    /// Pids of every worker, for diagnostics and tests.
    pub fn worker_pids(&self) -> Vec<u32> {
        self.cpu_workers
            .iter()
            .chain(&self.io_workers)
            .map(|w| w.pid())
            .collect()
    }

    /// Pool snapshot including a live load report per worker.
    pub async fn status(&self) -> ComponentStatus {
        let mut cpu_active = 0u32;
        let mut io_active = 0u32;
        let mut workers = serde_json::Map::new();

        for worker in self.cpu_workers.iter().chain(&self.io_workers) {
            let active = if worker.is_healthy() {
                worker.active_thread_count().await
            } else {
                0
            };
            match worker.class() {
                TaskClass::CpuBound => cpu_active += active,
                TaskClass::IoBound => io_active += active,
            }
            workers.insert(
                worker.worker_id().to_string(),
                json!({
                    "pid": worker.pid(),
                    "healthy": worker.is_healthy(),
                    "alive": worker.is_alive(),
                    "active_threads": active,
                    "in_flight": worker.in_flight_count(),
                }),
            );
        }

        let health = if self.dead_workers() == 0 {
            HEALTHY
        } else {
            UNHEALTHY
        };
        ComponentStatus::new(
            "process_pool",
            health,
            json!({
                "cpu_bound_workers": self.cpu_workers.len(),
                "io_bound_workers": self.io_workers.len(),
                "total_workers": self.total_workers(),
                "cpu_active_threads": cpu_active,
                "io_active_threads": io_active,
                "total_active_threads": cpu_active + io_active,
                "workers": serde_json::Value::Object(workers),
            }),
        )
    }

    /// Stop every worker concurrently within the grace interval.
    pub async fn shutdown(&self, graceful: bool, grace: std::time::Duration) {
        let mut handles = Vec::with_capacity(self.total_workers());
        for worker in self.cpu_workers.iter().chain(&self.io_workers) {
            let worker = Arc::clone(worker);
            handles.push(tokio::spawn(async move {
                worker.stop(graceful, grace).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!("process pool stopped");
    }
}

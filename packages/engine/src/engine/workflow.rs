// packages/engine/src/engine/workflow.rs
//! Workflow (DAG) manager
//!
//! Tracks dependencies between tasks entirely on the engine side: a task is
//! held back until every task it depends on has completed, and the upstream
//! results are injected into its params under `"upstream_results"` before
//! it is released. Nothing here touches the wire envelopes; workers never
//! see dependencies.
//!
//! The caller drives the cycle: `add_workflow`, submit whatever
//! `ready_tasks` returns, and feed each collected result to
//! `task_completed`, submitting the tasks it unlocks.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::task::{Task, TaskResult};

/// A task plus the ids it waits on.
#[derive(Debug, Clone)]
pub struct WorkflowTask {
    pub task: Task,
    pub dependencies: Vec<String>,
}

impl WorkflowTask {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            dependencies: Vec::new(),
        }
    }

    /// Add a dependency on another task's id.
    pub fn after(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }
}

#[derive(Default)]
struct Inner {
    /// All registered tasks, by id.
    tasks: HashMap<String, Task>,
    /// Reverse edges: dependency id -> ids waiting on it.
    dependents: HashMap<String, Vec<String>>,
    /// Forward edges, kept for result injection.
    dependencies: HashMap<String, Vec<String>>,
    /// Unmet dependency count; absent once released.
    waiting: HashMap<String, usize>,
    /// Completed results, for data passing to dependents.
    results: HashMap<String, TaskResult>,
}

/// Engine-side DAG coordinator.
#[derive(Default)]
pub struct WorkflowManager {
    inner: Mutex<Inner>,
}

impl WorkflowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group of tasks and their dependency edges.
    pub fn add_workflow(&self, tasks: Vec<WorkflowTask>) {
        let mut inner = self.inner.lock().unwrap();
        for entry in tasks {
            let id = entry.task.id.clone();
            inner.waiting.insert(id.clone(), entry.dependencies.len());
            for dep in &entry.dependencies {
                inner
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(id.clone());
            }
            inner.dependencies.insert(id.clone(), entry.dependencies);
            inner.tasks.insert(id, entry.task);
        }
    }

    /// Tasks with no unmet dependencies. Each is released exactly once.
    pub fn ready_tasks(&self) -> Vec<Task> {
        let mut inner = self.inner.lock().unwrap();
        let ready_ids: Vec<String> = inner
            .waiting
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(id, _)| id.clone())
            .collect();

        let mut released = Vec::with_capacity(ready_ids.len());
        for id in ready_ids {
            inner.waiting.remove(&id);
            if let Some(task) = inner.tasks.get(&id) {
                released.push(task.clone());
            }
        }
        released
    }

    /// Record a completed task and return the tasks it unlocked, with
    /// upstream results injected into their params.
    pub fn task_completed(&self, result: &TaskResult) -> Vec<Task> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .results
            .insert(result.task_id.clone(), result.clone());

        let dependents = inner
            .dependents
            .get(&result.task_id)
            .cloned()
            .unwrap_or_default();

        let mut unlocked_ids = Vec::new();
        for dependent in dependents {
            if let Some(count) = inner.waiting.get_mut(&dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inner.waiting.remove(&dependent);
                    unlocked_ids.push(dependent);
                }
            }
        }

        let mut unlocked = Vec::with_capacity(unlocked_ids.len());
        for id in unlocked_ids {
            let upstream: serde_json::Map<String, serde_json::Value> = inner
                .dependencies
                .get(&id)
                .into_iter()
                .flatten()
                .filter_map(|dep| {
                    inner
                        .results
                        .get(dep)
                        .map(|r| (dep.clone(), r.data.clone().unwrap_or(serde_json::Value::Null)))
                })
                .collect();

            if let Some(task) = inner.tasks.get_mut(&id) {
                inject_upstream(task, upstream);
                unlocked.push(task.clone());
            }
        }
        unlocked
    }

    /// Tasks registered but not yet released.
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().unwrap().waiting.len()
    }
}

/// Merge upstream results into the task's params object.
fn inject_upstream(task: &mut Task, upstream: serde_json::Map<String, serde_json::Value>) {
    if upstream.is_empty() {
        return;
    }
    if !task.params.is_object() {
        task.params = serde_json::Value::Object(serde_json::Map::new());
    }
    let params = task.params.as_object_mut().expect("params is an object");
    params.insert(
        "upstream_results".to_string(),
        serde_json::Value::Object(upstream),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskClass;
    use serde_json::json;

    fn task(name: &str) -> Task {
        Task::new(format!("/tmp/{name}.sh"), json!({"name": name}), TaskClass::IoBound)
    }

    #[test]
    fn independent_tasks_are_immediately_ready() {
        let manager = WorkflowManager::new();
        manager.add_workflow(vec![
            WorkflowTask::new(task("a")),
            WorkflowTask::new(task("b")),
        ]);
        assert_eq!(manager.ready_tasks().len(), 2);
        assert_eq!(manager.ready_tasks().len(), 0, "released exactly once");
    }

    #[test]
    fn dependent_task_waits_for_all_parents() {
        let manager = WorkflowManager::new();
        let a = task("a");
        let b = task("b");
        let c = task("c");
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        let c_id = c.id.clone();

        manager.add_workflow(vec![
            WorkflowTask::new(a),
            WorkflowTask::new(b),
            WorkflowTask::new(c).after(&a_id).after(&b_id),
        ]);

        let ready = manager.ready_tasks();
        assert_eq!(ready.len(), 2);
        assert!(ready.iter().all(|t| t.id != c_id));

        let first = manager.task_completed(&TaskResult::success(&a_id, json!(1), None));
        assert!(first.is_empty(), "c still waits on b");

        let second = manager.task_completed(&TaskResult::success(&b_id, json!(2), None));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, c_id);
        assert_eq!(manager.waiting_count(), 0);
    }

    #[test]
    fn unlocked_tasks_receive_upstream_results() {
        let manager = WorkflowManager::new();
        let a = task("a");
        let b = task("b");
        let a_id = a.id.clone();

        manager.add_workflow(vec![
            WorkflowTask::new(a),
            WorkflowTask::new(b).after(&a_id),
        ]);
        manager.ready_tasks();

        let unlocked =
            manager.task_completed(&TaskResult::success(&a_id, json!({"rows": 10}), None));
        assert_eq!(unlocked.len(), 1);
        assert_eq!(
            unlocked[0].params["upstream_results"][&a_id]["rows"],
            json!(10)
        );
        assert_eq!(unlocked[0].params["name"], json!("b"));
    }
}

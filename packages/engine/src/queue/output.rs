// packages/engine/src/queue/output.rs
//! Output (result) queue
//!
//! Near-unbounded MPMC queue of serialized result envelopes, fed by every
//! worker's reader task and drained by `Engine::get_result` callers.
//! `total_get` counts physical dequeues; a result later intercepted by the
//! cache is not counted again on caller delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::status::{ComponentStatus, HEALTHY};

/// Result queue shared by all worker processes.
pub struct OutputQueue {
    queue: ArrayQueue<String>,
    notify: Notify,
    total_put: AtomicU64,
    total_get: AtomicU64,
}

impl OutputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            notify: Notify::new(),
            total_put: AtomicU64::new(0),
            total_get: AtomicU64::new(0),
        }
    }

    /// Enqueue one result envelope. Non-blocking; `false` on full.
    pub fn put(&self, envelope: String) -> bool {
        match self.queue.push(envelope) {
            Ok(()) => {
                self.total_put.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
                true
            }
            Err(_) => false,
        }
    }

    /// Dequeue one result envelope, waiting up to `timeout`.
    pub async fn get(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(envelope) = self.queue.pop() {
                self.total_get.fetch_add(1, Ordering::Relaxed);
                return Some(envelope);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if tokio::time::timeout(deadline - now, self.notify.notified())
                .await
                .is_err()
            {
                let last = self.queue.pop();
                if last.is_some() {
                    self.total_get.fetch_add(1, Ordering::Relaxed);
                }
                return last;
            }
        }
    }

    /// Dequeue without waiting.
    pub fn try_get(&self) -> Option<String> {
        let item = self.queue.pop();
        if item.is_some() {
            self.total_get.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn status(&self) -> ComponentStatus {
        ComponentStatus::new(
            "output_queue",
            HEALTHY,
            json!({
                "size": self.len(),
                "maxsize": self.capacity(),
                "total_put": self.total_put.load(Ordering::Relaxed),
                "total_get": self.total_get.load(Ordering::Relaxed),
            }),
        )
    }
}

// packages/engine/src/queue/input.rs
//! Input (admission) queue
//!
//! Bounded MPMC queue of serialized task envelopes. Submitters push with a
//! non-blocking `put` (full queue reports back instead of blocking); the
//! dispatcher threads drain it with time-bounded `get`s so they can observe
//! the shutdown flag between draws.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::status::{ComponentStatus, HEALTHY, UNHEALTHY};

/// Admission queue carrying serialized task envelopes.
pub struct InputQueue {
    queue: ArrayQueue<String>,
    notify: Notify,
    total_put: AtomicU64,
    total_get: AtomicU64,
    total_dropped: AtomicU64,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            notify: Notify::new(),
            total_put: AtomicU64::new(0),
            total_get: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue one envelope. Non-blocking; `false` means the queue is full
    /// and the envelope was not accepted (counted as a drop).
    pub fn put(&self, envelope: String) -> bool {
        match self.queue.push(envelope) {
            Ok(()) => {
                self.total_put.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
                true
            }
            Err(_) => {
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Dequeue one envelope, waiting up to `timeout`.
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
            // A put between the failed pop and this await leaves a stored
            // permit, so the wakeup cannot be lost.
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

    /// Dequeue one envelope without waiting.
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

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Fill ratio, 0.0 - 1.0.
    pub fn fullness(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ComponentStatus {
        let dropped = self.total_dropped();
        let health = if dropped < 100 { HEALTHY } else { UNHEALTHY };
        ComponentStatus::new(
            "input_queue",
            health,
            json!({
                "size": self.len(),
                "maxsize": self.capacity(),
                "fullness": self.fullness(),
                "total_put": self.total_put.load(Ordering::Relaxed),
                "total_get": self.total_get.load(Ordering::Relaxed),
                "total_dropped": dropped,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let queue = InputQueue::new(4);
        assert!(queue.put("a".into()));
        assert_eq!(queue.get(Duration::from_millis(10)).await.as_deref(), Some("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn full_queue_rejects_and_counts_drops() {
        let queue = InputQueue::new(2);
        assert!(queue.put("a".into()));
        assert!(queue.put("b".into()));
        assert!(queue.is_full());

        assert!(!queue.put("c".into()));
        assert!(!queue.put("d".into()));
        assert_eq!(queue.total_dropped(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn get_times_out_on_empty_queue() {
        let queue = InputQueue::new(2);
        let start = std::time::Instant::now();
        assert!(queue.get(Duration::from_millis(50)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn get_wakes_on_concurrent_put() {
        let queue = std::sync::Arc::new(InputQueue::new(2));

        let consumer = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.get(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.put("x".into()));

        assert_eq!(consumer.await.unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn status_reports_fullness() {
        let queue = InputQueue::new(4);
        queue.put("a".into());
        let status = queue.status();
        assert_eq!(status.name, "input_queue");
        assert_eq!(status.metrics["size"], 1);
        assert_eq!(status.metrics["maxsize"], 4);
    }
}

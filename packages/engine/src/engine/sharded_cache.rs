// packages/engine/src/engine/sharded_cache.rs
//! Sharded result cache
//!
//! Buffers results that arrived out of order until their submitter collects
//! them. The id space is split across N shards, each an independently locked
//! LRU map, so concurrent collectors contend on 1/N of the cache under a
//! non-adversarial id distribution. The per-shard LRU bound protects memory
//! against slow or abandoned callers.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use md5::{Digest, Md5};
use serde_json::json;

use crate::status::{ComponentStatus, HEALTHY};
use crate::task::TaskResult;
use crate::utils::errors::{EngineError, Result};

/// Mutex-sharded LRU buffer of results awaiting collection.
pub struct ShardedResultCache {
    shards: Vec<Mutex<LruCache<String, TaskResult>>>,
}

impl ShardedResultCache {
    pub fn new(shard_count: usize, max_per_shard: usize) -> Result<Self> {
        if shard_count < 1 {
            return Err(EngineError::Config("shard_count must be >= 1".into()));
        }
        let max_per_shard = NonZeroUsize::new(max_per_shard)
            .ok_or_else(|| EngineError::Config("max_results_per_shard must be >= 1".into()))?;

        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(max_per_shard)))
            .collect();
        Ok(Self { shards })
    }

    /// Shard routing: MD5 of the utf-8 id, low 4 bytes little-endian,
    /// mod shard count. The exact recipe is part of the cache contract.
    fn shard_index(&self, task_id: &str) -> usize {
        let digest = Md5::digest(task_id.as_bytes());
        let low = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        low as usize % self.shards.len()
    }

    /// Insert a result as most-recently-used; evicts the shard's LRU entry
    /// beyond capacity.
    pub fn put(&self, task_id: &str, result: TaskResult) {
        let shard = &self.shards[self.shard_index(task_id)];
        shard.lock().unwrap().put(task_id.to_string(), result);
    }

    /// Remove and return the result for `task_id`. Consuming: the caller is
    /// the final recipient, so a hit leaves the cache without the entry.
    pub fn get(&self, task_id: &str) -> Option<TaskResult> {
        let shard = &self.shards[self.shard_index(task_id)];
        shard.lock().unwrap().pop(task_id)
    }

    /// Total entries across all shards.
    pub fn size(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().unwrap().clear();
        }
    }

    /// Per-shard sizes, for diagnostics.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.lock().unwrap().len()).collect()
    }

    pub fn status(&self) -> ComponentStatus {
        ComponentStatus::new(
            "result_cache",
            HEALTHY,
            json!({
                "size": self.size(),
                "shard_count": self.shards.len(),
                "shard_sizes": self.shard_sizes(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(id: &str) -> TaskResult {
        TaskResult::success(id, json!({"ok": true}), None)
    }

    #[test]
    fn get_consumes_the_entry() {
        let cache = ShardedResultCache::new(16, 100).unwrap();
        cache.put("task-1", result("task-1"));

        let hit = cache.get("task-1").unwrap();
        assert_eq!(hit.task_id, "task-1");
        assert!(cache.get("task-1").is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn miss_returns_none() {
        let cache = ShardedResultCache::new(4, 10).unwrap();
        assert!(cache.get("never-inserted").is_none());
    }

    #[test]
    fn evicts_least_recently_used_per_shard() {
        // One shard makes eviction order deterministic.
        let cache = ShardedResultCache::new(1, 2).unwrap();
        cache.put("a", result("a"));
        cache.put("b", result("b"));
        cache.put("c", result("c"));

        assert_eq!(cache.size(), 2);
        assert!(cache.get("a").is_none(), "oldest entry should be evicted");
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn ids_spread_across_shards() {
        let cache = ShardedResultCache::new(16, 100).unwrap();
        for i in 0..200 {
            let id = format!("task-{i}");
            cache.put(&id, result(&id));
        }
        let occupied = cache.shard_sizes().iter().filter(|&&n| n > 0).count();
        assert!(occupied >= 12, "md5 routing should touch most shards, got {occupied}");
    }

    #[test]
    fn shard_routing_is_stable() {
        let cache = ShardedResultCache::new(16, 100).unwrap();
        let a = cache.shard_index("5b1e0a48-9c54-4f9b-b3a7-6f2d8e301d8f");
        let b = cache.shard_index("5b1e0a48-9c54-4f9b-b3a7-6f2d8e301d8f");
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(ShardedResultCache::new(0, 10).is_err());
        assert!(ShardedResultCache::new(4, 0).is_err());
    }

    #[test]
    fn clear_empties_every_shard() {
        let cache = ShardedResultCache::new(8, 10).unwrap();
        for i in 0..20 {
            let id = format!("t{i}");
            cache.put(&id, result(&id));
        }
        cache.clear();
        assert_eq!(cache.size(), 0);
    }
}

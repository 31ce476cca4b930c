//! Per-(bucket, key) lock registry
//!
//! Reader/writer locks created lazily under one map-wide mutex; the mutex
//! is held only for the map lookup, never across an acquisition. Guards
//! are owned, so release happens on drop on every exit path. Entries are
//! kept for the registry lifetime; `sweep_unreferenced` is the optional
//! maintenance pass for long-lived processes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Registry of per-object reader/writer locks
pub struct LockRegistry {
    table: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, bucket: &str, key: &str) -> Arc<RwLock<()>> {
        let full = format!("{bucket}/{key}");
        let mut table = self.table.lock();
        Arc::clone(table.entry(full).or_default())
    }

    /// Acquire the shared side of the lock for (bucket, key)
    pub async fn read(&self, bucket: &str, key: &str) -> OwnedRwLockReadGuard<()> {
        self.entry(bucket, key).read_owned().await
    }

    /// Acquire the exclusive side of the lock for (bucket, key)
    pub async fn write(&self, bucket: &str, key: &str) -> OwnedRwLockWriteGuard<()> {
        self.entry(bucket, key).write_owned().await
    }

    /// Number of lock entries currently in the table
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries no caller holds; returns how many were removed
    pub fn sweep_unreferenced(&self) -> usize {
        let mut table = self.table.lock();
        let before = table.len();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - table.len()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_writers_same_key_serialize() {
        let registry = Arc::new(LockRegistry::new());
        let counter = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = registry.write("b", "k").await;
                let value = counter.load(Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                counter.store(value + 1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Lost updates would leave the counter short
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_readers_share() {
        let registry = LockRegistry::new();
        let first = registry.read("b", "k").await;
        let second = registry.read("b", "k").await;
        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn test_distinct_keys_independent() {
        let registry = LockRegistry::new();
        let write_a = registry.write("b", "a").await;
        // A writer on another key must not block
        let write_b = registry.write("b", "b").await;
        drop(write_a);
        drop(write_b);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_keeps_held_locks() {
        let registry = LockRegistry::new();
        let guard = registry.write("b", "held").await;
        let _ = registry.read("b", "idle").await;

        assert_eq!(registry.len(), 2);
        let removed = registry.sweep_unreferenced();
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 1);
        drop(guard);
    }
}

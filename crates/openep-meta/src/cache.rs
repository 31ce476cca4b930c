//! Capacity-bound LRU read cache
//!
//! Fronts point lookups on the metadata store. Writers update or drop the
//! cached entry before their transaction returns, so the cache never
//! serves a value older than the last successful put.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: AtomicU64,
    /// Lookups that fell through to the store
    pub misses: AtomicU64,
}

impl CacheStats {
    /// Hit ratio over all lookups so far
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

struct Inner {
    entries: HashMap<String, (Vec<u8>, u64)>,
    // Eviction order: sequence -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

/// LRU cache of raw metadata values
pub struct LruCache {
    inner: Mutex<Inner>,
    capacity: usize,
    stats: CacheStats,
}

impl LruCache {
    /// Create a cache holding at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            capacity,
            stats: CacheStats::default(),
        }
    }

    /// Look up a value, refreshing its recency on hit
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        match inner.entries.get_mut(key) {
            Some((value, old_seq)) => {
                let value = value.clone();
                let prev = std::mem::replace(old_seq, seq);
                inner.order.remove(&prev);
                inner.order.insert(seq, key.to_string());
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a value
    pub fn put(&self, key: String, value: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if let Some((_, prev)) = inner.entries.insert(key.clone(), (value, seq)) {
            inner.order.remove(&prev);
        }
        inner.order.insert(seq, key);

        while inner.entries.len() > self.capacity {
            let Some((&oldest, _)) = inner.order.iter().next() else {
                break;
            };
            if let Some(victim) = inner.order.remove(&oldest) {
                inner.entries.remove(&victim);
            }
        }
    }

    /// Drop a key
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some((_, seq)) = inner.entries.remove(key) {
            inner.order.remove(&seq);
        }
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit/miss counters
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

//! In-process L1 cache tier.
//!
//! Bounded LRU keyed by string, holding serialized values with per-entry
//! TTL. All operations are synchronous; the orchestrator is the only
//! mutator. Expiry is lazy: an expired entry is removed when touched.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct MemoryEntry {
    value: String,
    expires_at: Instant,
    bytes: usize,
}

struct MemoryCacheInner {
    entries: LruCache<String, MemoryEntry>,
    total_bytes: usize,
}

/// Bounded in-memory LRU cache with per-entry TTL.
pub struct MemoryCache {
    inner: Mutex<MemoryCacheInner>,
    max_bytes: usize,
}

impl MemoryCache {
    /// Create a cache bounded by entry count and aggregate value bytes.
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("capacity is non-zero");
        Self {
            inner: Mutex::new(MemoryCacheInner {
                entries: LruCache::new(capacity),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Get a value, promoting it in LRU order. Expired entries are removed
    /// and reported absent.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().expect("l1 lock poisoned");
        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            if let Some(entry) = inner.entries.pop(key) {
                inner.total_bytes -= entry.bytes;
            }
        }
        None
    }

    /// Insert a value with a TTL, evicting least-recently-used entries as
    /// needed to stay within both bounds.
    pub fn set(&self, key: &str, value: String, ttl: Duration) {
        let bytes = value.len();
        let entry = MemoryEntry {
            value,
            expires_at: Instant::now() + ttl,
            bytes,
        };

        let mut inner = self.inner.lock().expect("l1 lock poisoned");
        if let Some(evicted) = inner.entries.push(key.to_string(), entry) {
            inner.total_bytes -= evicted.1.bytes;
        }
        inner.total_bytes += bytes;

        while inner.total_bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.total_bytes -= evicted.bytes,
                None => break,
            }
        }
    }

    /// Remove a key. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("l1 lock poisoned");
        match inner.entries.pop(key) {
            Some(entry) => {
                inner.total_bytes -= entry.bytes;
                true
            }
            None => false,
        }
    }

    /// Remove every live entry whose key matches the predicate.
    ///
    /// O(n) over resident entries; acceptable because capacity is bounded.
    pub fn delete_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut inner = self.inner.lock().expect("l1 lock poisoned");
        let matched: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matched {
            if let Some(entry) = inner.entries.pop(key) {
                inner.total_bytes -= entry.bytes;
            }
        }
        matched.len()
    }

    /// Number of resident entries, including not-yet-collected expired ones.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("l1 lock poisoned").entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("l1 lock poisoned");
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    /// Remove all expired entries eagerly.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.delete_where_entry(|entry| entry.expires_at <= now)
    }

    fn delete_where_entry(&self, predicate: impl Fn(&MemoryEntry) -> bool) -> usize {
        let mut inner = self.inner.lock().expect("l1 lock poisoned");
        let matched: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matched {
            if let Some(entry) = inner.entries.pop(key) {
                inner.total_bytes -= entry.bytes;
            }
        }
        matched.len()
    }
}

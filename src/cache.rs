//! Bounded TTL + LRU cache for task results.
//!
//! Entries expire individually (lazy check on access, plus an optional
//! background sweep) and the map is capped: an insert that would exceed
//! `max_size` evicts exactly one least-recently-used entry first.
//!
//! Uses `IndexMap` for O(1) recency bookkeeping: a hit moves the entry to
//! the back, so the front of the map is always the LRU candidate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;

struct CacheEntry<V> {
    value: V,
    inserted: Instant,
    last_accessed: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted: now,
            last_accessed: now,
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.inserted.elapsed() >= self.ttl
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

impl CacheStats {
    /// Hit rate in `0.0..=1.0`; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded key→value store with per-entry expiry and LRU eviction.
pub struct TtlCache<V> {
    entries: Mutex<IndexMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            default_ttl: config.default_ttl,
            max_size: config.max_size.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Insert with the default TTL. Overwrites an existing entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL. If the insert would push the map past
    /// `max_size`, the least-recently-used entry is evicted first.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut map = self.entries.lock().expect("cache lock poisoned");

        if let Some(idx) = map.get_index_of(&key) {
            map[idx] = CacheEntry::new(value, ttl);
            let last = map.len() - 1;
            map.move_index(idx, last);
            return;
        }

        if map.len() >= self.max_size {
            map.shift_remove_index(0);
        }
        map.insert(key, CacheEntry::new(value, ttl));
    }

    /// Look up a live entry, refreshing its recency. Expired entries are
    /// removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut map = self.entries.lock().expect("cache lock poisoned");
        let Some(idx) = map.get_index_of(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let (expired, value) = {
            let (_, entry) = map.get_index(idx).expect("index valid under lock");
            (entry.is_expired(), entry.value.clone())
        };
        if expired {
            map.shift_remove_index(idx);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let (_, entry) = map.get_index_mut(idx).expect("index valid under lock");
        entry.last_accessed = Instant::now();
        let last = map.len() - 1;
        map.move_index(idx, last);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Restart an entry's expiry clock with a new TTL, leaving the value
    /// and recency untouched. Returns false if the key is absent or
    /// already expired.
    pub fn touch(&self, key: &str, new_ttl: Duration) -> bool {
        let mut map = self.entries.lock().expect("cache lock poisoned");
        let Some(idx) = map.get_index_of(key) else {
            return false;
        };
        let (_, entry) = map.get_index_mut(idx).expect("index valid under lock");
        if entry.is_expired() {
            map.shift_remove_index(idx);
            return false;
        }
        entry.inserted = Instant::now();
        entry.ttl = new_ttl;
        true
    }

    /// Expiry-honoring existence check. Does not refresh recency.
    pub fn has(&self, key: &str) -> bool {
        let mut map = self.entries.lock().expect("cache lock poisoned");
        let Some(idx) = map.get_index_of(key) else {
            return false;
        };
        let (_, entry) = map.get_index(idx).expect("index valid under lock");
        if entry.is_expired() {
            map.shift_remove_index(idx);
            return false;
        }
        true
    }

    /// Explicit removal. Returns the value if it was present.
    pub fn remove(&self, key: &str) -> Option<V> {
        let mut map = self.entries.lock().expect("cache lock poisoned");
        map.shift_remove(key).map(|entry| entry.value)
    }

    /// Remove every expired entry; returns how many were purged. Keys
    /// that are never re-read are reclaimed here rather than pinning
    /// memory until eviction.
    pub fn purge_expired(&self) -> usize {
        let mut map = self.entries.lock().expect("cache lock poisoned");
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired());
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.len(),
        }
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    /// Run `purge_expired` on a background task every `interval`. The
    /// sweeper holds only a weak reference and exits once the cache is
    /// dropped; abort the handle to stop it sooner.
    pub fn spawn_sweeper(cache: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(cache);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "cache sweep removed expired entries");
                }
            }
        })
    }
}

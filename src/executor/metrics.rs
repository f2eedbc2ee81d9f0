//! Execution counters and snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Atomic execution counters, updated as tasks finish.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    total_executed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    failures: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished task, cached or not.
    pub fn record_completion(&self, duration: Duration, success: bool) {
        self.total_executed.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_executed = self.total_executed.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);

        let lookups = cache_hits + cache_misses;
        let cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            cache_hits as f64 / lookups as f64
        };
        let avg_duration_ms = if total_executed == 0 {
            0.0
        } else {
            total_duration_ms as f64 / total_executed as f64
        };

        MetricsSnapshot {
            total_executed,
            cache_hits,
            cache_misses,
            failures,
            cache_hit_rate,
            avg_duration_ms,
        }
    }
}

/// Point-in-time view of the counters with derived rates. JSON-ready for
/// the reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_executed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failures: u64,
    /// `hits / (hits + misses)`; 0.0 before any lookup.
    pub cache_hit_rate: f64,
    /// Mean task duration; 0.0 before any execution.
    pub avg_duration_ms: f64,
}

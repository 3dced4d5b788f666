//! Cache performance counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Point-in-time view of cache activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Entries removed by explicit or pattern invalidation
    pub invalidations: u64,
    /// Entries removed by expiry sweeps (including corrupted entries)
    pub expired_swept: u64,
    /// Writes that hit a storage quota
    pub quota_events: u64,
    /// Average retrieval time across hits, milliseconds
    pub avg_retrieval_time_ms: f64,
}

impl CacheStats {
    /// Hit rate as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Thread-safe counters recorded by the cache manager
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    expired_swept: AtomicU64,
    quota_events: AtomicU64,
    // retrieval time is tracked in whole microseconds to stay atomic
    retrieval_time_us: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, retrieval_time_ms: f64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.retrieval_time_us
            .fetch_add((retrieval_time_ms * 1_000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: u64) {
        self.expired_swept.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_quota_event(&self) {
        self.quota_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let retrieval_time_us = self.retrieval_time_us.load(Ordering::Relaxed);
        let avg_retrieval_time_ms = if hits > 0 {
            retrieval_time_us as f64 / hits as f64 / 1_000.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            expired_swept: self.expired_swept.load(Ordering::Relaxed),
            quota_events: self.quota_events.load(Ordering::Relaxed),
            avg_retrieval_time_ms,
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.expired_swept.store(0, Ordering::Relaxed);
        self.quota_events.store(0, Ordering::Relaxed);
        self.retrieval_time_us.store(0, Ordering::Relaxed);
    }
}

/// Operation timing helper
#[derive(Debug)]
pub struct OperationTimer {
    start: Instant,
}

impl OperationTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let metrics = CacheMetrics::new();
        metrics.record_hit(1.0);
        metrics.record_hit(3.0);
        metrics.record_miss();
        metrics.record_miss();

        let stats = metrics.snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hit_rate(), 50.0);
        assert!((stats.avg_retrieval_time_ms - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_stats_hit_rate_is_zero() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_write();
        metrics.record_invalidations(3);
        metrics.record_quota_event();
        metrics.reset();

        let stats = metrics.snapshot();
        assert_eq!(stats.writes, 0);
        assert_eq!(stats.invalidations, 0);
        assert_eq!(stats.quota_events, 0);
    }

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }
}

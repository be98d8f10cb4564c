//! Read-path counters for a cache client.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered with a real cached value.
    pub hits: u64,
    /// Reads answered by a cached null marker.
    pub null_hits: u64,
    /// Reads that found no entry at all.
    pub misses: u64,
    /// Loader calls made on the caller's path.
    pub loads: u64,
    /// Loader calls that failed on the caller's path.
    pub load_failures: u64,
    /// Times a caller found the rebuild lock already held.
    pub lock_contentions: u64,
    /// Mutex reads that gave up waiting.
    pub lock_timeouts: u64,
    /// Logically expired entries served while a rebuild runs elsewhere.
    pub stale_reads: u64,
    pub rebuilds_submitted: u64,
    pub rebuilds_rejected: u64,
}

impl CacheStats {
    /// Fraction of lookups answered from the cache (0.0 to 1.0).
    ///
    /// Null hits and stale reads count as answered.
    pub fn hit_rate(&self) -> f64 {
        let answered = self.hits + self.null_hits + self.stale_reads;
        let total = answered + self.misses;
        if total == 0 {
            0.0
        } else {
            answered as f64 / total as f64
        }
    }
}

/// Live counters shared by clones of a client.
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    pub(crate) hits: AtomicU64,
    pub(crate) null_hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) loads: AtomicU64,
    pub(crate) load_failures: AtomicU64,
    pub(crate) lock_contentions: AtomicU64,
    pub(crate) lock_timeouts: AtomicU64,
    pub(crate) stale_reads: AtomicU64,
    pub(crate) rebuilds_submitted: AtomicU64,
    pub(crate) rebuilds_rejected: AtomicU64,
}

impl CacheMetrics {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            null_hits: self.null_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            rebuilds_submitted: self.rebuilds_submitted.load(Ordering::Relaxed),
            rebuilds_rejected: self.rebuilds_rejected.load(Ordering::Relaxed),
        }
    }
}

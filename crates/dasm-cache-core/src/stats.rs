//! Cache-wide operational counters (supplemented feature: `CacheStats`).
//! Plain atomics polled on demand — there is no metrics exporter wired in
//! (Non-goals: no observability integration), just cheap enough to sample
//! directly from a caller that wants to log or assert on it.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evicted: AtomicU64,
    reenqueued: AtomicU64,
}

impl StatsCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, n: u64) {
        self.evicted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_reenqueued(&self, n: u64) {
        self.reenqueued.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            reenqueued: self.reenqueued.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of the cache's operational counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evicted: u64,
    pub reenqueued: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let counters = StatsCounters::default();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        counters.record_evicted(3);
        counters.record_reenqueued(1);
        let snap = counters.snapshot();
        assert_eq!(snap, CacheStats { hits: 2, misses: 1, evicted: 3, reenqueued: 1 });
    }
}

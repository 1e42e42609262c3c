//! The background evictor/detector (§4.5): a single thread that wakes up
//! every [`SWEEP_INTERVAL`] and asks the index to reclaim idle nodes and
//! re-enqueue stale ones. All actual eviction/re-enqueue-eligibility logic
//! lives in [`crate::index::StripedIndex::sweep`]; this module only owns
//! the timer and wires a re-enqueue callback onto the ring.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::clock::{now_us, UserClock};
use crate::collaborators::FileWatcher;
use crate::index::{EvictionThresholds, StripedIndex};
use crate::ring::{U2pRing, WorkOrder};
use crate::stats::StatsCounters;

/// Nominal sweep period (§4.5: "every 100ms").
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

pub struct Evictor {
    index: Arc<StripedIndex>,
    ring: Arc<U2pRing>,
    clock: Arc<UserClock>,
    file_watcher: Arc<dyn FileWatcher>,
    thresholds: EvictionThresholds,
    stats: Arc<StatsCounters>,
}

impl Evictor {
    pub fn new(
        index: Arc<StripedIndex>,
        ring: Arc<U2pRing>,
        clock: Arc<UserClock>,
        file_watcher: Arc<dyn FileWatcher>,
        thresholds: EvictionThresholds,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            index,
            ring,
            clock,
            file_watcher,
            thresholds,
            stats,
        }
    }

    /// Run one sweep immediately, returning the number of nodes reclaimed.
    /// Exposed separately from `run_loop` so tests and a manual "run the
    /// evictor now" hook don't need a sleeping background thread.
    pub fn sweep_once(&self) -> usize {
        let now = now_us();
        let now_user_idx = self.clock.idx();
        let change_gen_snapshot = self.file_watcher.change_gen();
        let ring = Arc::clone(&self.ring);
        let mut reenqueued = 0u64;
        let evicted = self.index.sweep(
            &self.thresholds,
            now,
            now_user_idx,
            change_gen_snapshot,
            |hash, params| {
                ring.enqueue_unbounded(&WorkOrder { hash, params });
                reenqueued += 1;
            },
        );
        self.stats.record_evicted(evicted as u64);
        self.stats.record_reenqueued(reenqueued);
        if evicted > 0 {
            log::debug!("evictor: reclaimed {evicted} nodes this sweep");
        }
        evicted
    }

    /// Loop forever, sweeping every [`SWEEP_INTERVAL`]. Meant to run on its
    /// own dedicated thread, spawned by `Cache::init`.
    pub fn run_loop(self: Arc<Self>) {
        loop {
            thread::sleep(SWEEP_INTERVAL);
            self.sweep_once();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{Arch, ContentHash, Params, StyleFlags, Syntax};
    use crate::scope::Scope;

    struct StaticWatcher(u64);
    impl FileWatcher for StaticWatcher {
        fn change_gen(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn sweep_reclaims_idle_published_node() {
        let index = Arc::new(StripedIndex::new(16, 4));
        let ring = Arc::new(U2pRing::new(crate::ring::MIN_CAPACITY_BYTES));
        let clock = Arc::new(UserClock::new());
        let hash = ContentHash::new(21, 0);
        let params = Params::new(0x1000, Arch::X64, StyleFlags::empty(), Syntax::Intel);

        let mut scope = Scope::new();
        index.lookup(&mut scope, hash, &params, 0, 0);
        index.try_claim(hash, &params);
        index.publish(hash, &params, crate::inst::Info::empty(), 0);
        scope.close(&index);

        let evictor = Evictor::new(
            Arc::clone(&index),
            ring,
            clock,
            Arc::new(StaticWatcher(0)),
            EvictionThresholds {
                touch_age_us: 0,
                touch_user_ticks: 0,
                reenqueue_age_us: u64::MAX,
                reenqueue_user_ticks: u64::MAX,
            },
            Arc::new(StatsCounters::default()),
        );

        assert_eq!(evictor.sweep_once(), 1);
    }

    #[test]
    fn sweep_reenqueues_stale_change_gen() {
        let index = Arc::new(StripedIndex::new(16, 4));
        let ring = Arc::new(U2pRing::new(crate::ring::MIN_CAPACITY_BYTES));
        let clock = Arc::new(UserClock::new());
        let hash = ContentHash::new(22, 0);
        let params = Params::new(0x1000, Arch::X64, StyleFlags::empty(), Syntax::Intel);

        let mut scope = Scope::new();
        index.lookup(&mut scope, hash, &params, 0, 0);
        index.try_claim(hash, &params);
        index.publish(hash, &params, crate::inst::Info::empty(), 1);
        scope.close(&index);

        let evictor = Evictor::new(
            Arc::clone(&index),
            Arc::clone(&ring),
            clock,
            Arc::new(StaticWatcher(2)),
            EvictionThresholds {
                touch_age_us: u64::MAX,
                touch_user_ticks: u64::MAX,
                reenqueue_age_us: 0,
                reenqueue_user_ticks: 0,
            },
            Arc::new(StatsCounters::default()),
        );

        assert_eq!(evictor.sweep_once(), 0);
        let order = ring.dequeue();
        assert_eq!(order.hash, hash);
    }
}

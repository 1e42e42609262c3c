//! The public entry point: wires the striped index, the U2P ring, the
//! worker pool, and the background evictor together behind one handle.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::{now_us, UserClock};
use crate::collaborators::{DebugInfoService, FileWatcher, HashStore, TextService};
use crate::index::{EvictionThresholds, StripedIndex};
use crate::inst::Info;
use crate::params::{ContentHash, Params};
use crate::ring::{U2pRing, WorkOrder, MIN_CAPACITY_BYTES};
use crate::scope::Scope;
use crate::stats::{CacheStats, StatsCounters};
use crate::worker::WorkerPipeline;

/// Bound on how long `info_from_hash_params` waits for room on the U2P
/// ring before giving up on enqueueing a first-miss work order (§7:
/// "ring-full with expired deadline" degrades to an empty `Info`, logged,
/// never panics).
const DEFAULT_ENQUEUE_DEADLINE: Duration = Duration::from_millis(50);

/// Construction-time tunables (ambient configuration, no external config
/// file format — every field has a sensible nominal default from the
/// design, matching the values named throughout §3-§4.5).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total fixed slot count. Nominal default 1024.
    pub slots_count: u64,
    /// Stripe count; `None` derives `min(slots_count, available_parallelism())`.
    pub stripes_count: Option<u64>,
    /// U2P ring backing-buffer size in bytes. Floored to `MIN_CAPACITY_BYTES`.
    pub ring_capacity_bytes: usize,
    /// Number of worker threads draining the ring.
    pub worker_threads: usize,
    pub thresholds: EvictionThresholds,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            slots_count: 1024,
            stripes_count: None,
            ring_capacity_bytes: MIN_CAPACITY_BYTES,
            worker_threads: 4,
            thresholds: EvictionThresholds::default(),
        }
    }
}

/// The disassembly cache. Cheap to clone (an `Arc` wrapper around shared
/// state); `init` spawns its worker pool and evictor thread as daemons
/// that outlive the returned handle for the life of the process.
pub struct Cache {
    index: Arc<StripedIndex>,
    ring: Arc<U2pRing>,
    clock: Arc<UserClock>,
    hash_store: Arc<dyn HashStore>,
    stats: Arc<StatsCounters>,
}

impl Cache {
    /// Build the cache and spawn its worker pool and evictor thread.
    pub fn init(
        config: CacheConfig,
        hash_store: Arc<dyn HashStore>,
        debug_info: Arc<dyn DebugInfoService>,
        text_service: Arc<dyn TextService>,
        file_watcher: Arc<dyn FileWatcher>,
    ) -> Arc<Self> {
        let stripes_count = config.stripes_count.unwrap_or_else(|| {
            let cpus = thread::available_parallelism()
                .map(|n| n.get() as u64)
                .unwrap_or(1);
            cpus.min(config.slots_count.max(1))
        });

        let index = Arc::new(StripedIndex::new(config.slots_count, stripes_count));
        let ring = Arc::new(U2pRing::new(config.ring_capacity_bytes));
        let clock = Arc::new(UserClock::new());
        let stats = Arc::new(StatsCounters::default());

        let pipeline = Arc::new(WorkerPipeline::new(
            Arc::clone(&hash_store),
            debug_info,
            text_service,
            Arc::clone(&file_watcher),
        ));
        for n in 0..config.worker_threads.max(1) {
            let pipeline = Arc::clone(&pipeline);
            let index = Arc::clone(&index);
            let ring = Arc::clone(&ring);
            thread::Builder::new()
                .name(format!("dasm-cache-worker-{n}"))
                .spawn(move || pipeline.run_loop(index, ring))
                .expect("failed to spawn worker thread");
        }

        let evictor = Arc::new(crate::evictor::Evictor::new(
            Arc::clone(&index),
            Arc::clone(&ring),
            Arc::clone(&clock),
            file_watcher,
            config.thresholds,
            Arc::clone(&stats),
        ));
        thread::Builder::new()
            .name("dasm-cache-evictor".to_string())
            .spawn(move || evictor.run_loop())
            .expect("failed to spawn evictor thread");

        log::info!(
            "cache initialized: {} slots across {} stripes, {} worker threads",
            config.slots_count,
            stripes_count,
            config.worker_threads
        );

        Arc::new(Self {
            index,
            ring,
            clock,
            hash_store,
            stats,
        })
    }

    /// Advance the user clock by one tick (§4.6).
    pub fn user_clock_tick(&self) {
        self.clock.tick();
    }

    pub fn user_clock_idx(&self) -> u64 {
        self.clock.idx()
    }

    /// Open a new scope. The returned handle must be passed to every
    /// lookup the caller wants pinned against eviction, and eventually
    /// closed with [`Cache::scope_close`].
    pub fn scope_open(&self) -> Scope {
        Scope::new()
    }

    pub fn scope_close(&self, scope: &mut Scope) {
        scope.close(&self.index);
    }

    /// §4.1 `lookup` proper: resolve `(hash, params)` to an `Info`,
    /// enqueueing a work order on first miss. Never blocks the caller past
    /// `DEFAULT_ENQUEUE_DEADLINE`, and never returns an error — a
    /// ring-full or zero-hash situation degrades to an empty `Info`.
    pub fn info_from_hash_params(&self, scope: &mut Scope, hash: ContentHash, params: &Params) -> Info {
        if hash.is_zero() {
            return Info::empty();
        }
        let now = now_us();
        let user_idx = self.clock.idx();
        let (info, is_new) = self.index.lookup(scope, hash, params, now, user_idx);
        if is_new {
            self.stats.record_miss();
            let order = WorkOrder {
                hash,
                params: params.clone(),
            };
            let deadline = Instant::now() + DEFAULT_ENQUEUE_DEADLINE;
            if !self.ring.enqueue(&order, deadline) {
                log::warn!("cache: enqueue deadline expired for hash {hash:?}, caller sees a miss");
            }
        } else {
            self.stats.record_hit();
        }
        info
    }

    /// `lookup_by_key`: resolve a symbolic key to a content hash before
    /// delegating to [`Cache::info_from_hash_params`]. When the caller
    /// asks for the current revision (`rewind_idx == 0`) and it hasn't
    /// resolved to anything cached yet, falls back to the immediately
    /// preceding revision rather than returning an empty `Info` — a
    /// slightly stale view beats a blank one for an interactive caller
    /// (§9 Open Questions: "two-revision rewind"). A caller that
    /// explicitly asked for a specific non-current revision gets exactly
    /// what the hash store resolves for it, with no further fallback.
    pub fn info_from_key_params(
        &self,
        scope: &mut Scope,
        key: &str,
        rewind_idx: u8,
        params: &Params,
    ) -> Info {
        if let Some(hash) = self.hash_store.hash_from_key(key, rewind_idx) {
            let info = self.info_from_hash_params(scope, hash, params);
            if !info.is_empty() || rewind_idx != 0 {
                return info;
            }
        } else if rewind_idx != 0 {
            return Info::empty();
        }

        match self.hash_store.hash_from_key(key, 1) {
            Some(hash) => self.info_from_hash_params(scope, hash, params),
            None => Info::empty(),
        }
    }

    /// Manual flush hook (supplemented feature): reclaim every node with
    /// no live scope reference right now, ignoring the touch-age
    /// thresholds the background evictor otherwise waits out.
    pub fn evict_all(&self) -> usize {
        let n = self.index.evict_all_unreferenced();
        self.stats.record_evicted(n as u64);
        n
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

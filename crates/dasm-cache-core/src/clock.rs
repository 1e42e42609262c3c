//! The externally-ticked user clock (§4.6): an activity-weighted age axis
//! orthogonal to wall-clock age.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A process-wide counter incremented once per caller-defined "tick" (e.g.
/// once per UI frame). An entry untouched for both a wall-clock age *and*
/// a user-clock tick count is eligible for eviction; neither axis alone
/// decides it, so idle wall-clock time and bursty-but-brief activity both
/// fail to evict a genuinely-in-use entry.
#[derive(Debug, Default)]
pub struct UserClock {
    idx: AtomicU64,
}

impl UserClock {
    pub fn new() -> Self {
        Self {
            idx: AtomicU64::new(0),
        }
    }

    pub fn tick(&self) {
        self.idx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idx(&self) -> u64 {
        self.idx.load(Ordering::Relaxed)
    }
}

/// Microsecond wall-clock reading, used for `last_time_*` node fields.
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

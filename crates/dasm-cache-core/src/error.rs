//! Internal error type (§ Ambient stack: error handling).
//!
//! Per §7 of the design, no error ever reaches a `lookup`-style caller —
//! the taxonomy there is handled by silent degradation. `CacheError` exists
//! for the narrower internal surface where a caller of a lower-level API
//! (tests, the evictor, a future CLI) benefits from a typed result instead
//! of a bare `bool`/log line.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("u2p ring enqueue deadline expired before {needed} bytes became available")]
    RingEnqueueTimedOut { needed: usize },

    #[error("work order on the u2p ring was truncated")]
    TruncatedWorkOrder,
}

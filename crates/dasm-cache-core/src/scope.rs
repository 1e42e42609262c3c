//! Scopes bound how long a lookup's result is allowed to stay pinned
//! against eviction (§4.2). Opening a scope marks a position in the
//! calling thread's touch arena; closing it releases every touch recorded
//! since, decrementing each touched node's `scope_ref_count` so the
//! evictor is free to reclaim it again once no other scope still holds it.
//!
//! A `Scope` is not `Send` in spirit even though nothing here forbids it
//! structurally — callers are expected to open and close one per
//! logical unit of work on a single thread, mirroring a stack discipline.
//! Nesting is supported: an inner `open`/`close` pair only releases the
//! touches recorded inside it.

use crate::arena::ScopedArena;
use crate::index::StripedIndex;
use crate::params::{ContentHash, Params};

pub struct Scope {
    touches: ScopedArena<(ContentHash, Params)>,
    mark_stack: Vec<usize>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            touches: ScopedArena::new(),
            mark_stack: Vec::new(),
        }
    }

    pub(crate) fn record_touch(&mut self, hash: ContentHash, params: Params) {
        self.touches.push((hash, params));
    }

    /// Open a nested scope, returning nothing the caller needs to hold on
    /// to — `close` always unwinds the innermost still-open scope, the
    /// same stack discipline `ScopedArena`'s marks already assume.
    pub fn open(&mut self) {
        self.mark_stack.push(self.touches.mark());
    }

    /// Close the innermost open scope (or, if none was explicitly opened,
    /// the implicit root scope spanning this `Scope`'s whole lifetime),
    /// releasing every touch recorded since it opened.
    pub fn close(&mut self, index: &StripedIndex) {
        let mark = self.mark_stack.pop().unwrap_or(0);
        for (hash, params) in self.touches.since(mark) {
            index.release_touch(*hash, params);
        }
        self.touches.rewind_to(mark);
    }

    /// Number of touches currently pinned by this scope (any level).
    pub fn pinned_count(&self) -> usize {
        self.touches.len()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

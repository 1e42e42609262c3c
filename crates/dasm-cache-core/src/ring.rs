//! The U2P ring: a single bounded byte ring carrying variable-length work
//! orders from requester threads to the worker pool (§4.3).
//!
//! Read and write positions are monotonic `u64` counters; the physical
//! index into the backing buffer is always `counter % capacity`. Enqueue
//! waits on a condition variable while there isn't enough free space
//! (bounded by an absolute deadline); dequeue waits while there aren't
//! enough unconsumed bytes for a fixed header (unbounded — callers that
//! need a bound loop with their own polling, since the U2P ring itself has
//! no cancellation, per §5).

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::params::{Arch, ContentHash, DbgiKey, Params, StyleFlags, Syntax};

/// Minimum capacity accepted by [`U2pRing::new`], matching §3's "capacity
/// ≥ 64 KiB".
pub const MIN_CAPACITY_BYTES: usize = 64 * 1024;

/// A dequeued unit of work: the identity a worker must materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrder {
    pub hash: ContentHash,
    pub params: Params,
}

fn arch_tag(arch: Arch) -> u8 {
    match arch {
        Arch::X86 => 0,
        Arch::X64 => 1,
    }
}

fn arch_from_tag(tag: u8) -> Arch {
    match tag {
        0 => Arch::X86,
        _ => Arch::X64,
    }
}

fn syntax_tag(syntax: Syntax) -> u8 {
    match syntax {
        Syntax::Intel => 0,
        Syntax::Att => 1,
    }
}

fn syntax_from_tag(tag: u8) -> Syntax {
    match tag {
        0 => Syntax::Intel,
        _ => Syntax::Att,
    }
}

/// Serialize `(hash, vaddr, arch, style_flags, syntax, base_vaddr,
/// path_size, path_bytes, min_timestamp)` plus trailing zero padding up to
/// an 8-byte boundary.
fn serialize(order: &WorkOrder) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&order.hash.hi.to_le_bytes());
    buf.extend_from_slice(&order.hash.lo.to_le_bytes());
    buf.extend_from_slice(&order.params.vaddr.to_le_bytes());
    buf.push(arch_tag(order.params.arch));
    buf.extend_from_slice(&order.params.style_flags.bits().to_le_bytes());
    buf.push(syntax_tag(order.params.syntax));
    buf.extend_from_slice(&order.params.base_vaddr.to_le_bytes());
    let path = &order.params.dbgi_key.path;
    buf.extend_from_slice(&(path.len() as u32).to_le_bytes());
    buf.extend_from_slice(path);
    buf.extend_from_slice(&order.params.dbgi_key.min_timestamp.to_le_bytes());
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
    buf
}

/// Byte length of the fixed-size header fields (everything but the
/// variable-length path).
const FIXED_HEADER_LEN: usize = 8 // hash.hi
    + 8 // hash.lo
    + 8 // vaddr
    + 1 // arch
    + 4 // style_flags
    + 1 // syntax
    + 8 // base_vaddr
    + 4; // path_size
const TRAILER_LEN: usize = 8; // min_timestamp

struct RingState {
    buf: Vec<u8>,
    head: u64,
    tail: u64,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn used(&self) -> u64 {
        self.tail - self.head
    }

    fn available(&self) -> usize {
        self.capacity() - self.used() as usize
    }

    fn write_wrapped(&mut self, data: &[u8]) {
        let cap = self.capacity();
        let mut pos = (self.tail % cap as u64) as usize;
        for &byte in data {
            self.buf[pos] = byte;
            pos = (pos + 1) % cap;
        }
        self.tail += data.len() as u64;
    }

    fn read_wrapped(&mut self, len: usize) -> Vec<u8> {
        let cap = self.capacity();
        let mut pos = (self.head % cap as u64) as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.buf[pos]);
            pos = (pos + 1) % cap;
        }
        self.head += len as u64;
        out
    }
}

/// The process-wide requester-to-worker ring.
pub struct U2pRing {
    state: Mutex<RingState>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl U2pRing {
    pub fn new(capacity_bytes: usize) -> Self {
        let capacity_bytes = capacity_bytes.max(MIN_CAPACITY_BYTES);
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity_bytes],
                head: 0,
                tail: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueue a work order, waiting on the ring's capacity condition
    /// variable until `deadline` if there isn't enough room. Returns
    /// `false` if the deadline passed first (§7: "ring-full with expired
    /// deadline").
    pub fn enqueue(&self, order: &WorkOrder, deadline: Instant) -> bool {
        let payload = serialize(order);
        let mut state = self.state.lock();
        loop {
            if state.available() >= payload.len() {
                state.write_wrapped(&payload);
                self.not_empty.notify_all();
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "u2p ring: enqueue deadline expired with {} bytes needed, {} available",
                    payload.len(),
                    state.available()
                );
                return false;
            }
            let timeout = deadline - now;
            let wait = self
                .not_full
                .wait_for(&mut state, timeout.min(Duration::from_millis(50)));
            let _ = wait;
        }
    }

    /// Enqueue with no deadline (the unbounded-deadline case used for
    /// first-miss insertion and evictor re-enqueue).
    pub fn enqueue_unbounded(&self, order: &WorkOrder) {
        // An unbounded deadline on a ring sized generously enough in
        // practice never blocks; we still loop defensively rather than
        // asserting capacity.
        let far_future = Instant::now() + Duration::from_secs(100 * 365 * 24 * 3600);
        let ok = self.enqueue(order, far_future);
        debug_assert!(ok, "unbounded enqueue should never observe an expired deadline");
    }

    /// Dequeue a work order, blocking until one is available. Uncancellable,
    /// matching §5 ("dequeue is uncancellable").
    pub fn dequeue(&self) -> WorkOrder {
        let mut state = self.state.lock();
        loop {
            if state.used() as usize >= FIXED_HEADER_LEN {
                if let Some(order) = self.try_read_one(&mut state) {
                    return order;
                }
            }
            self.not_empty.wait(&mut state);
        }
    }

    fn try_read_one(&self, state: &mut RingState) -> Option<WorkOrder> {
        if (state.used() as usize) < FIXED_HEADER_LEN {
            return None;
        }
        let header = state.read_wrapped(FIXED_HEADER_LEN);
        let hash_hi = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let hash_lo = u64::from_le_bytes(header[8..16].try_into().unwrap());
        let vaddr = u64::from_le_bytes(header[16..24].try_into().unwrap());
        let arch = arch_from_tag(header[24]);
        let style_flags = StyleFlags::from_bits_truncate(u32::from_le_bytes(
            header[25..29].try_into().unwrap(),
        ));
        let syntax = syntax_from_tag(header[29]);
        let base_vaddr = u64::from_le_bytes(header[30..38].try_into().unwrap());
        let path_size = u32::from_le_bytes(header[38..42].try_into().unwrap()) as usize;

        // Header said there's a path of `path_size` bytes plus the
        // trailing timestamp; if that hasn't all landed yet, put the
        // header back conceptually by treating this as "not enough data"
        // — in practice the producer always writes header+path+trailer+
        // padding atomically under the same lock acquisition, so once the
        // header is visible the rest is too. We still guard defensively.
        let remaining_needed = path_size + TRAILER_LEN;
        if (state.used() as usize) < remaining_needed {
            // Should not happen given enqueue's atomicity; rewind is not
            // possible on this ring design, so treat as a truncated
            // message and surface an empty path rather than panic.
            log::error!("u2p ring: truncated work order, missing {remaining_needed} trailing bytes");
            let path_bytes = state.read_wrapped(state.used() as usize);
            let _ = path_bytes;
            return None;
        }

        let path_bytes = state.read_wrapped(path_size);
        let trailer = state.read_wrapped(TRAILER_LEN);
        let min_timestamp = u64::from_le_bytes(trailer[0..8].try_into().unwrap());

        let mut consumed = FIXED_HEADER_LEN + path_size + TRAILER_LEN;
        while consumed % 8 != 0 {
            if (state.used() as usize) == 0 {
                break;
            }
            state.read_wrapped(1);
            consumed += 1;
        }

        self.not_full.notify_all();

        Some(WorkOrder {
            hash: ContentHash::new(hash_hi, hash_lo),
            params: Params {
                vaddr,
                arch,
                style_flags,
                syntax,
                base_vaddr,
                dbgi_key: DbgiKey {
                    path: path_bytes,
                    min_timestamp,
                },
            },
        })
    }
}

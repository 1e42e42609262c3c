//! Decoded-instruction records and the chunked builder that assembles them.
//!
//! `InstChunkList` amortizes allocation during decoding the way a bump
//! arena would: instructions are appended into fixed-capacity chunks, and
//! only the final `finalize()` call flattens them into one contiguous
//! `InstArray`. No chunk is ever resized once it starts filling, so a
//! worker can decode tens of thousands of instructions without a single
//! large reallocation.

/// One decoded instruction plus its text-rendering annotations.
///
/// `text_range` indexes into a text blob held by the hash store, not into
/// any buffer owned by this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inst {
    /// Byte offset into the decoded byte stream. `0` for pseudo-instructions
    /// (source-file/line annotation lines injected between real instructions).
    pub code_off: u64,
    /// Resolved jump/call target virtual offset, or `0` if the instruction
    /// is not a direct branch.
    pub jump_dst_vaddr: u64,
    /// `[start, end)` byte range into the joined text blob.
    pub text_range: (u32, u32),
}

impl Inst {
    pub fn is_pseudo(&self) -> bool {
        self.code_off == 0 && self.jump_dst_vaddr == 0
    }
}

const CHUNK_CAPACITY: usize = 256;

/// Append-only list of fixed-capacity `Inst` chunks.
#[derive(Debug, Default)]
pub struct InstChunkList {
    chunks: Vec<Vec<Inst>>,
}

impl InstChunkList {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    pub fn push(&mut self, inst: Inst) {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() < CHUNK_CAPACITY => chunk.push(inst),
            _ => {
                let mut chunk = Vec::with_capacity(CHUNK_CAPACITY);
                chunk.push(inst);
                self.chunks.push(chunk);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten all chunks into a single contiguous array, consuming the
    /// builder. Called exactly once, at worker-publish time (§4.4 step 8).
    pub fn finalize(self) -> InstArray {
        let insts = self.chunks.into_iter().flatten().collect();
        InstArray { insts }
    }
}

/// Contiguous, immutable instruction array materialized from an
/// `InstChunkList` at publication time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstArray {
    insts: Vec<Inst>,
}

impl InstArray {
    pub fn empty() -> Self {
        Self { insts: Vec::new() }
    }

    pub fn count(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn as_slice(&self) -> &[Inst] {
        &self.insts
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Inst> {
        self.insts.iter()
    }
}

/// A published decode result. Immutable once constructed; `text_key` is the
/// hash-store key under which the joined, newline-separated textual
/// rendering was submitted — the text bytes themselves live in the hash
/// store, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub text_key: crate::params::ContentHash,
    pub insts: InstArray,
}

impl Info {
    /// The empty placeholder returned for a zero-hash lookup or an
    /// as-yet-unmaterialized node (§4.1 step 5).
    pub fn empty() -> Self {
        Self {
            text_key: crate::params::ContentHash::ZERO,
            insts: InstArray::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ContentHash;

    fn real_inst(off: u64) -> Inst {
        Inst {
            code_off: off,
            jump_dst_vaddr: 0,
            text_range: (0, 0),
        }
    }

    #[test]
    fn chunk_list_spans_multiple_chunks() {
        let mut list = InstChunkList::new();
        for i in 0..(CHUNK_CAPACITY * 3 + 7) {
            list.push(real_inst(i as u64));
        }
        assert_eq!(list.len(), CHUNK_CAPACITY * 3 + 7);
        let array = list.finalize();
        assert_eq!(array.count(), CHUNK_CAPACITY * 3 + 7);
        for (idx, inst) in array.iter().enumerate() {
            assert_eq!(inst.code_off, idx as u64);
        }
    }

    #[test]
    fn empty_info_has_zero_text_key() {
        let info = Info::empty();
        assert_eq!(info.text_key, ContentHash::ZERO);
        assert!(info.is_empty());
    }
}

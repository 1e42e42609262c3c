//! Identity and decoding-parameter types.
//!
//! [`ContentHash`] and [`Params`] together form a cache entry's identity
//! (§3 of the design doc: "two nodes with equal identity never coexist in
//! the index"). Equality is always structural, including the byte-equal
//! `dbgi_key.path` comparison — there is no interning or hash-only
//! shortcut, since two distinct debug-info paths must never collide.

use std::fmt;

/// 128-bit opaque content fingerprint, modeled as two `u64` halves so the
/// striped index can hash on `hi` alone (see [`ContentHash::hi`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContentHash {
    pub hi: u64,
    pub lo: u64,
}

impl ContentHash {
    /// The distinguished absent value. `lookup` treats this as an
    /// immediate empty-result short-circuit.
    pub const ZERO: ContentHash = ContentHash { hi: 0, lo: 0 };

    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:016x}{:016x})", self.hi, self.lo)
    }
}

/// Architecture tag. Open by design (§ Supplemented features): only
/// [`Arch::X86`] and [`Arch::X64`] are wired to a decoder today; an
/// unrecognized arch degrades to an empty instruction stream rather than
/// panicking, matching the silent-degradation policy used everywhere else
/// in the worker pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Arch {
    X86,
    X64,
}

impl Arch {
    /// Decoder bitness, used to seed the streaming decoder.
    pub fn bitness(self) -> u32 {
        match self {
            Arch::X86 => 32,
            Arch::X64 => 64,
        }
    }
}

/// Instruction syntax flavor for the decoder's text formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syntax {
    Intel,
    Att,
}

bitflags::bitflags! {
    /// Annotation/rendering options selected by the caller. A set over
    /// {Addresses, CodeBytes, SourceFilesNames, SourceLines, SymbolNames}.
    #[derive(Default)]
    pub struct StyleFlags: u32 {
        const ADDRESSES          = 0b0000_0001;
        const CODE_BYTES         = 0b0000_0010;
        const SOURCE_FILES_NAMES = 0b0000_0100;
        const SOURCE_LINES       = 0b0000_1000;
        const SYMBOL_NAMES       = 0b0001_0000;
    }
}

/// `(path, min_timestamp)` identifying a specific debug-info artifact
/// revision. `path` is compared byte-for-byte; it is the value that gets
/// deep-copied into the owning node on insert (§3: "deep-copying
/// `dbgi_key.path` bytes into the stripe arena" — in this Rust translation
/// that deep copy is simply `Vec<u8>` ownership, see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DbgiKey {
    pub path: Vec<u8>,
    pub min_timestamp: u64,
}

impl DbgiKey {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty_path(&self) -> bool {
        self.path.is_empty()
    }
}

/// Decoding-parameter tuple. Structural equality over every field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Params {
    pub vaddr: u64,
    pub arch: Arch,
    pub style_flags: StyleFlags,
    pub syntax: Syntax,
    pub base_vaddr: u64,
    pub dbgi_key: DbgiKey,
}

impl Params {
    pub fn new(vaddr: u64, arch: Arch, style_flags: StyleFlags, syntax: Syntax) -> Self {
        Self {
            vaddr,
            arch,
            style_flags,
            syntax,
            base_vaddr: 0,
            dbgi_key: DbgiKey::empty(),
        }
    }

    pub fn with_dbgi_key(mut self, dbgi_key: DbgiKey, base_vaddr: u64) -> Self {
        self.dbgi_key = dbgi_key;
        self.base_vaddr = base_vaddr;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_is_zero() {
        assert!(ContentHash::ZERO.is_zero());
        assert!(!ContentHash::new(1, 0).is_zero());
    }

    #[test]
    fn params_equality_includes_path_bytes() {
        let base = Params::new(0x1000, Arch::X64, StyleFlags::ADDRESSES, Syntax::Intel);
        let a = base.clone().with_dbgi_key(
            DbgiKey {
                path: b"/a.pdb".to_vec(),
                min_timestamp: 1,
            },
            0,
        );
        let b = base.with_dbgi_key(
            DbgiKey {
                path: b"/b.pdb".to_vec(),
                min_timestamp: 1,
            },
            0,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn arch_bitness() {
        assert_eq!(Arch::X86.bitness(), 32);
        assert_eq!(Arch::X64.bitness(), 64);
    }
}

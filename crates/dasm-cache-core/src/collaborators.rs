//! Trait boundaries for the four external collaborators this cache
//! composes but does not implement (§6, "Consumed"): the content-addressed
//! hash store, the debug-info service, the file-system watcher, and the
//! text service. Each trait is the narrow interface the worker pipeline
//! actually calls — not a port of every accessor the upstream service
//! exposes.

use std::sync::Arc;

use crate::params::ContentHash;

/// Maps content hashes to byte blobs and back, and resolves symbolic keys
/// to (possibly historical) hashes.
pub trait HashStore: Send + Sync {
    /// Fetch the bytes for a content hash, if known.
    fn data_from_hash(&self, hash: ContentHash) -> Option<Arc<[u8]>>;

    /// Resolve a symbolic key to one of its historical hash revisions.
    /// `rewind_idx = 0` is the current revision, `1` the previous one.
    fn hash_from_key(&self, key: &str, rewind_idx: u8) -> Option<ContentHash>;

    /// Compute the content hash of a byte blob (used by callers that
    /// already have data in hand and want its identity).
    fn hash_from_data(&self, data: &[u8]) -> ContentHash;

    /// Submit a blob under a pre-allocated key, returning the hash it was
    /// stored under. Takes `data` by value: the caller can no longer touch
    /// it afterward, matching the "ownership transferred by move"
    /// semantics of the original `submit_data` (§9, Open Questions).
    fn submit_data(&self, key: ContentHash, data: Vec<u8>) -> ContentHash;
}

/// Source-language tag for [`TextService`] line-range lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    C,
    Cpp,
    Rust,
    Unknown,
}

/// Classify a file extension, mirroring `lang_kind_from_extension` (§6).
pub fn lang_kind_from_extension(path: &[u8]) -> Lang {
    let path = String::from_utf8_lossy(path);
    match path.rsplit('.').next() {
        Some("c") | Some("h") => Lang::C,
        Some("cc") | Some("cpp") | Some("hpp") | Some("cxx") => Lang::Cpp,
        Some("rs") => Lang::Rust,
        _ => Lang::Unknown,
    }
}

/// Per-line byte ranges into a file's text blob.
#[derive(Debug, Clone, Default)]
pub struct TextInfo {
    pub lines_ranges: Vec<(u64, u64)>,
}

impl TextInfo {
    pub fn lines_count(&self) -> usize {
        self.lines_ranges.len()
    }
}

/// Tokenizes source files into per-line byte ranges and resolves a file's
/// filesystem-derived key.
pub trait TextService: Send + Sync {
    /// Derive the hash-store key for a file path (content not required yet).
    fn fs_key_from_path(&self, path: &[u8]) -> ContentHash;

    /// Resolve a key+language to its current `TextInfo` and content hash.
    /// Returns `None` until the text service has actually produced a
    /// non-zero hash for this key (callers poll with a bounded deadline —
    /// see §9 Open Questions resolution in SPEC_FULL.md).
    fn text_info_from_key_lang(&self, key: ContentHash, lang: Lang) -> Option<(TextInfo, ContentHash)>;
}

/// One resolved `(unit, line)` pair for a virtual offset.
#[derive(Debug, Clone)]
pub struct LineInfo {
    pub unit_path: Vec<u8>,
    pub line_number: u32,
}

/// A parsed debug-info artifact. The "nil parse" is modeled as `None` at
/// the call site rather than a sentinel singleton, which is the idiomatic
/// Rust translation of "distinguishable by identity comparison with the
/// singleton nil" (§6).
pub trait ParsedDebugInfo: Send + Sync {
    /// Resolve the source unit/line for a virtual offset, if debug
    /// information covers it.
    fn line_for_voff(&self, voff: u64) -> Option<LineInfo>;

    /// Resolve the name of the procedure containing `voff`, used for
    /// `SymbolNames` annotation of jump/call targets.
    fn procedure_name_for_voff(&self, voff: u64) -> Option<String>;
}

/// Parses a `(path, min_timestamp)` debug-info key into a queryable
/// artifact.
pub trait DebugInfoService: Send + Sync {
    /// Parse (or fetch a cached parse of) the debug-info artifact named by
    /// `dbgi_key`. Returns `None` for a missing/unparseable artifact —
    /// the worker then degrades annotations silently (§7).
    fn rdi_from_key(&self, path: &[u8], min_timestamp: u64) -> Option<Arc<dyn ParsedDebugInfo>>;
}

/// Supplies a monotonically advancing change-generation counter, bumped on
/// any observed file-system mutation. Equality over time means nothing
/// relevant has changed.
pub trait FileWatcher: Send + Sync {
    fn change_gen(&self) -> u64;
}

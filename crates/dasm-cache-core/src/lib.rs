//! A concurrent, evicting cache of disassembled instruction streams.
//!
//! Callers resolve `(content hash, decoding params)` or `(symbolic key,
//! decoding params)` pairs to a rendered [`inst::Info`] through a
//! [`cache::Cache`] handle. A miss enqueues a work order for a background
//! worker pool, which decodes the requested byte range with `iced-x86`,
//! annotates it using the caller's debug-info and text-service
//! collaborators, and publishes the result back into the striped index.
//! An evictor thread reclaims nodes that have gone unreferenced and
//! untouched on both the wall-clock and user-clock axes, and re-enqueues
//! ones whose debug info has gone stale.

pub mod arena;
pub mod cache;
pub mod clock;
pub mod collaborators;
pub mod decode;
pub mod error;
pub mod evictor;
pub mod index;
pub mod inst;
pub mod params;
pub mod ring;
pub mod scope;
pub mod stats;
pub mod worker;

pub use cache::{Cache, CacheConfig};
pub use collaborators::{
    DebugInfoService, FileWatcher, HashStore, Lang, LineInfo, ParsedDebugInfo, TextInfo,
    TextService,
};
pub use error::CacheError;
pub use index::EvictionThresholds;
pub use inst::{Inst, InstArray, Info};
pub use params::{Arch, ContentHash, DbgiKey, Params, StyleFlags, Syntax};
pub use scope::Scope;
pub use stats::CacheStats;

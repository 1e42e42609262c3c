//! The worker pipeline (§4.4): consumes dequeued work orders and turns
//! each into a published [`Info`], composing the hash store, debug-info
//! service, text service, and file watcher collaborators into one decode
//! job. Single-flight ownership is enforced by the index's `is_working`
//! CAS, not by anything in this module.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::collaborators::{
    lang_kind_from_extension, DebugInfoService, FileWatcher, HashStore, LineInfo, TextInfo,
    TextService,
};
use crate::decode::{decode_and_render, LineTextProvider};
use crate::index::StripedIndex;
use crate::inst::Info;
use crate::params::{ContentHash, StyleFlags};
use crate::ring::{U2pRing, WorkOrder};

/// Bound on how long a worker polls the text service for a file's text to
/// become ready before giving up on quoting its source line (bounded
/// line-text wait, §9 Open Questions).
pub const TEXT_READY_WAIT: Duration = Duration::from_millis(20);
const TEXT_READY_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Resolves `SOURCE_LINES` annotation text by composing the text service
/// (to tokenize a file into line ranges) with the hash store (to fetch the
/// actual bytes `TextInfo`'s ranges index into). Caches one resolution per
/// distinct file path for the lifetime of a single decode job, since a
/// unit's lines are looked up once per file change rather than once per
/// instruction.
struct TextServiceLineTextProvider<'a> {
    text_service: &'a dyn TextService,
    hash_store: &'a dyn HashStore,
    cache: RefCell<HashMap<Vec<u8>, Option<(TextInfo, Arc<[u8]>)>>>,
}

impl<'a> TextServiceLineTextProvider<'a> {
    fn new(text_service: &'a dyn TextService, hash_store: &'a dyn HashStore) -> Self {
        Self {
            text_service,
            hash_store,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Poll the text service until it reports a non-zero hash for `path`,
    /// then fetch that blob from the hash store. Bounded by
    /// `TEXT_READY_WAIT`; a timeout degrades to "no text for this file".
    fn load(&self, path: &[u8]) -> Option<(TextInfo, Arc<[u8]>)> {
        let key = self.text_service.fs_key_from_path(path);
        let lang = lang_kind_from_extension(path);
        let deadline = Instant::now() + TEXT_READY_WAIT;
        loop {
            if let Some((info, hash)) = self.text_service.text_info_from_key_lang(key, lang) {
                if !hash.is_zero() {
                    if let Some(bytes) = self.hash_store.data_from_hash(hash) {
                        return Some((info, bytes));
                    }
                }
            }
            if Instant::now() >= deadline {
                log::debug!(
                    "worker: text service did not produce source text for a path within {TEXT_READY_WAIT:?}"
                );
                return None;
            }
            thread::sleep(TEXT_READY_POLL_INTERVAL);
        }
    }
}

impl<'a> LineTextProvider for TextServiceLineTextProvider<'a> {
    fn resolve(&self, line: &LineInfo) -> Option<Vec<u8>> {
        let mut cache = self.cache.borrow_mut();
        let entry = cache
            .entry(line.unit_path.clone())
            .or_insert_with(|| self.load(&line.unit_path));

        let (info, bytes) = entry.as_ref()?;
        let idx = line.line_number.checked_sub(1)? as usize;
        let (start, end) = *info.lines_ranges.get(idx)?;
        let slice = bytes.get(start as usize..end as usize)?;
        let text = String::from_utf8_lossy(slice);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.as_bytes().to_vec())
        }
    }
}

/// The collaborators a worker composes into a single decode job (§6
/// "Consumed").
pub struct WorkerPipeline {
    pub hash_store: Arc<dyn HashStore>,
    pub debug_info: Arc<dyn DebugInfoService>,
    pub text_service: Arc<dyn TextService>,
    pub file_watcher: Arc<dyn FileWatcher>,
}

impl WorkerPipeline {
    pub fn new(
        hash_store: Arc<dyn HashStore>,
        debug_info: Arc<dyn DebugInfoService>,
        text_service: Arc<dyn TextService>,
        file_watcher: Arc<dyn FileWatcher>,
    ) -> Self {
        Self {
            hash_store,
            debug_info,
            text_service,
            file_watcher,
        }
    }

    /// Process one dequeued order end to end (§4.4 steps 3-9): snapshot
    /// the change generation, claim, fetch, decode, submit the rendered
    /// text, publish.
    pub fn process(&self, index: &StripedIndex, order: WorkOrder) {
        if !index.try_claim(order.hash, &order.params) {
            log::trace!("worker: node no longer claimable, dropping order");
            return;
        }

        let code = match self.hash_store.data_from_hash(order.hash) {
            Some(code) => code,
            None => {
                log::warn!("worker: no data for hash {:?}, abandoning claim", order.hash);
                index.release_claim(order.hash, &order.params);
                return;
            }
        };

        let rdi = if order.params.dbgi_key.is_empty_path() {
            None
        } else {
            self.debug_info.rdi_from_key(
                &order.params.dbgi_key.path,
                order.params.dbgi_key.min_timestamp,
            )
        };

        // §4.4 step 3: snapshotted before decode, so a file change that
        // races the decode itself is conservatively re-enqueued rather
        // than silently missed.
        let change_gen_snapshot = self.file_watcher.change_gen();

        let wants_source_annotation = order.params.style_flags.contains(StyleFlags::SOURCE_LINES)
            || order
                .params
                .style_flags
                .contains(StyleFlags::SOURCE_FILES_NAMES);

        let line_text_provider = TextServiceLineTextProvider::new(
            self.text_service.as_ref(),
            self.hash_store.as_ref(),
        );
        let line_text: Option<&dyn LineTextProvider> = if wants_source_annotation && rdi.is_some() {
            Some(&line_text_provider)
        } else {
            None
        };

        let (insts, text) =
            decode_and_render(&code, &order.params, rdi.as_deref(), line_text);

        let text_key = if text.is_empty() {
            ContentHash::ZERO
        } else {
            let key = self.hash_store.hash_from_data(&text);
            self.hash_store.submit_data(key, text)
        };

        // §4.4 step 9: a node only becomes re-enqueueable on file changes
        // when it was actually annotated against debug info; otherwise a
        // bare decode with no source annotation would be spuriously
        // reconsidered by the evictor every sweep (breaking P6).
        let change_gen = if wants_source_annotation && rdi.is_some() {
            change_gen_snapshot
        } else {
            0
        };

        index.publish(
            order.hash,
            &order.params,
            Info { text_key, insts },
            change_gen,
        );
        log::debug!("worker: published result for hash {:?}", order.hash);
    }

    /// Block on `ring.dequeue()` and process orders forever. Intended to
    /// run on each of a pool's worker threads (§4.4: "N worker threads",
    /// spawned by the cache's own `init`).
    pub fn run_loop(self: Arc<Self>, index: Arc<StripedIndex>, ring: Arc<U2pRing>) {
        loop {
            let order = ring.dequeue();
            self.process(&index, order);
        }
    }
}

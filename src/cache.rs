//! Answer cache keyed by question.
//!
//! Fixed capacity with least-recently-used eviction. There is no TTL:
//! an answer stays until it is overwritten or pushed out by newer entries.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use hickory_proto::op::Message;
use lru::LruCache;
use rustc_hash::FxBuildHasher;
use tracing::warn;

use crate::dns::Question;

/// Default number of cached answers (2^20).
pub const DEFAULT_CAPACITY: usize = 1 << 20;

type Entries = LruCache<Question, Arc<Message>, FxBuildHasher>;

/// Thread-safe LRU store of the latest successful answer per question.
///
/// Answers are held behind `Arc` and never mutated once stored; readers
/// get a shared handle and build their own reply from it. The cache fails
/// open: with zero capacity or a poisoned lock every lookup misses and
/// every store is skipped.
pub struct AnswerCache {
    entries: Option<Mutex<Entries>>,
}

impl AnswerCache {
    pub fn new(capacity: usize) -> Self {
        let entries = match NonZeroUsize::new(capacity) {
            Some(capacity) => Some(Mutex::new(LruCache::with_hasher(capacity, FxBuildHasher))),
            None => {
                warn!("Answer cache capacity is zero, caching disabled");
                None
            }
        };

        Self { entries }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self { entries: None }
    }

    /// Look up the answer for `question`, marking it recently used.
    pub fn get(&self, question: &Question) -> Option<Arc<Message>> {
        let Ok(mut entries) = self.entries.as_ref()?.lock() else {
            return None;
        };

        entries.get(question).cloned()
    }

    /// Store `answer`, replacing any previous answer for `question`.
    ///
    /// Evicts the least recently used entry when the cache is full.
    pub fn put(&self, question: Question, answer: Message) {
        let Some(entries) = self.entries.as_ref() else {
            return;
        };
        let Ok(mut entries) = entries.lock() else {
            return;
        };

        entries.put(question, Arc::new(answer));
    }

    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|e| e.lock().ok().map(|e| e.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|e| e.lock().ok().map(|e| e.cap().get()))
            .unwrap_or(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }
}

impl Default for AnswerCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

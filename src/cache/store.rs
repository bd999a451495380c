//! L1: bounded in-process LRU store.

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use lru::LruCache;
use metrics::counter;

use super::lock::rw_write;

const SOURCE: &str = "cache::store";

/// A settled resolution outcome, as stored in both cache tiers.
///
/// `NotFound` is a first-class case rather than an absent entry so a
/// confirmed CDN 404 can be cached (negative caching).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEntry {
    Found(Arc<str>),
    NotFound,
}

impl DocumentEntry {
    /// The caller-facing value for this entry: the document body, or `None`
    /// for a confirmed absence.
    pub fn body(&self) -> Option<Arc<str>> {
        match self {
            Self::Found(body) => Some(Arc::clone(body)),
            Self::NotFound => None,
        }
    }
}

/// L1 document store.
///
/// Keyed by the raw document id string. Values are only written once the
/// id's resolution (from L2 or origin) has fully settled.
pub struct DocumentStore {
    entries: RwLock<LruCache<String, DocumentEntry>>,
}

impl DocumentStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Tri-state lookup.
    ///
    /// `None` means the id was never resolved — continue the lookup chain.
    /// `Some(_)` is a settled outcome, found or not-found, and short-circuits
    /// the resolution either way.
    pub fn get(&self, document_id: &str) -> Option<DocumentEntry> {
        // LRU get updates recency, so even reads take the write guard.
        let entry = rw_write(&self.entries, SOURCE, "get")
            .get(document_id)
            .cloned();
        match entry {
            Some(_) => counter!("persisted_documents_l1_hit_total").increment(1),
            None => counter!("persisted_documents_l1_miss_total").increment(1),
        }
        entry
    }

    pub fn put(&self, document_id: String, entry: DocumentEntry) {
        rw_write(&self.entries, SOURCE, "put").put(document_id, entry);
    }

    pub fn len(&self) -> usize {
        rw_write(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> DocumentStore {
        DocumentStore::new(NonZeroUsize::new(capacity).expect("non-zero capacity"))
    }

    #[test]
    fn get_is_tri_state() {
        let store = store(4);

        assert_eq!(store.get("app~1~a"), None);

        store.put(
            "app~1~a".to_string(),
            DocumentEntry::Found(Arc::from("query { me }")),
        );
        store.put("app~1~b".to_string(), DocumentEntry::NotFound);

        let found = store.get("app~1~a").expect("settled entry");
        assert_eq!(found.body().as_deref(), Some("query { me }"));

        let not_found = store.get("app~1~b").expect("settled entry");
        assert_eq!(not_found, DocumentEntry::NotFound);
        assert_eq!(not_found.body(), None);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let store = store(2);

        store.put("a".to_string(), DocumentEntry::NotFound);
        store.put("b".to_string(), DocumentEntry::NotFound);

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(store.get("a").is_some());

        store.put("c".to_string(), DocumentEntry::NotFound);

        assert!(store.get("a").is_some());
        assert_eq!(store.get("b"), None);
        assert!(store.get("c").is_some());
    }

    #[test]
    fn not_found_survives_roundtrip() {
        let store = store(2);
        store.put("missing".to_string(), DocumentEntry::NotFound);
        // A cached absence is a hit, not a miss.
        assert_eq!(store.get("missing"), Some(DocumentEntry::NotFound));
    }
}

//! Two-tier cache for resolved persisted documents.
//!
//! - **L1 (in-process)**: bounded LRU keyed by the raw document id.
//! - **L2 (distributed, optional)**: caller-supplied backend (e.g. Redis)
//!   wrapped in an adapter that layers key prefixing, independent
//!   positive/negative TTLs, fail-open reads, and fire-and-forget writes.
//!
//! Both tiers store either the document body or an explicit not-found
//! marker: "looked up and confirmed absent" must stay distinguishable from
//! "never looked up" for negative caching to work.

pub(crate) mod lock;
mod remote;
mod store;

pub use remote::{
    NOT_FOUND_SENTINEL, RemoteCache, RemoteCacheAdapter, RemoteCacheError, RemoteLookup, WaitUntil,
};
pub use store::{DocumentEntry, DocumentStore};

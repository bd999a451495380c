//! L2: pluggable distributed cache adapter.
//!
//! The backend (e.g. Redis) is supplied by the host and accessed through
//! the [`RemoteCache`] trait. [`RemoteCacheAdapter`] layers the resolver's
//! policy on top: key prefixing, independent positive/negative TTLs,
//! fail-open reads, and fire-and-forget writes. An L2 outage must never
//! break document resolution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use super::store::DocumentEntry;

/// Canonical storage marker for a cached not-found outcome.
///
/// [`RemoteLookup`] is the contract; this constant exists only so
/// string-valued backends share one wire representation of the marker.
pub const NOT_FOUND_SENTINEL: &str = "__not_found__";

/// Outcome of a backend read.
///
/// `Miss` (no entry) is distinct from `NotFound` (an entry recording a
/// confirmed CDN 404); only the former continues the lookup chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLookup {
    Found(String),
    NotFound,
    Miss,
}

impl RemoteLookup {
    /// Interpret a raw value fetched from a string-valued backend.
    pub fn from_wire(value: Option<String>) -> Self {
        match value {
            None => Self::Miss,
            Some(value) if value == NOT_FOUND_SENTINEL => Self::NotFound,
            Some(value) => Self::Found(value),
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteCacheError {
    #[error("remote cache backend error: {0}")]
    Backend(String),
    #[error("remote cache is read-only")]
    ReadOnly,
}

impl RemoteCacheError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Host-implemented distributed cache backend.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<RemoteLookup, RemoteCacheError>;

    /// Write a settled entry. Optional: the default declines, making the
    /// cache read-only. Implementations that support writes must also
    /// override [`RemoteCache::is_writable`].
    async fn set(
        &self,
        key: &str,
        entry: &DocumentEntry,
        ttl: Option<Duration>,
    ) -> Result<(), RemoteCacheError> {
        let _ = (key, entry, ttl);
        Err(RemoteCacheError::ReadOnly)
    }

    fn is_writable(&self) -> bool {
        false
    }
}

/// Hook that keeps a detached cache write alive past the response in hosts
/// that freeze the process once a response is sent (serverless `waitUntil`).
pub type WaitUntil = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

/// Resolver-side policy wrapper around a [`RemoteCache`] backend.
pub struct RemoteCacheAdapter {
    backend: Arc<dyn RemoteCache>,
    key_prefix: String,
    ttl: Option<Duration>,
    not_found_ttl: Option<Duration>,
    negative_caching: bool,
    wait_until: Option<WaitUntil>,
}

impl RemoteCacheAdapter {
    /// Build the adapter, normalizing TTL inputs.
    ///
    /// Negative TTL values degrade to "no expiry" with a warning rather
    /// than rejecting the configuration. A not-found TTL of exactly `0`
    /// disables negative caching: a confirmed absence is never written to
    /// L2, which avoids churn for always-absent ids.
    pub fn new(
        backend: Arc<dyn RemoteCache>,
        key_prefix: String,
        ttl_seconds: Option<i64>,
        not_found_ttl_seconds: i64,
        wait_until: Option<WaitUntil>,
    ) -> Self {
        let ttl = normalize_ttl(ttl_seconds, "l2_ttl_seconds");
        let (not_found_ttl, negative_caching) = if not_found_ttl_seconds == 0 {
            (None, false)
        } else {
            (
                normalize_ttl(Some(not_found_ttl_seconds), "l2_not_found_ttl_seconds"),
                true,
            )
        };

        Self {
            backend,
            key_prefix,
            ttl,
            not_found_ttl,
            negative_caching,
            wait_until,
        }
    }

    fn key(&self, document_id: &str) -> String {
        format!("{}{}", self.key_prefix, document_id)
    }

    /// Fail-open read: backend failures are logged and reported as a miss
    /// so the resolution falls through to the origin.
    pub async fn get(&self, document_id: &str) -> RemoteLookup {
        let key = self.key(document_id);
        match self.backend.get(&key).await {
            Ok(RemoteLookup::Miss) => {
                counter!("persisted_documents_l2_miss_total").increment(1);
                RemoteLookup::Miss
            }
            Ok(lookup) => {
                counter!("persisted_documents_l2_hit_total").increment(1);
                lookup
            }
            Err(error) => {
                counter!("persisted_documents_l2_error_total").increment(1);
                warn!(key, %error, "Remote cache read failed, treating as miss");
                RemoteLookup::Miss
            }
        }
    }

    /// Fire-and-forget write: never awaited on the critical path, outcome
    /// only logged. The adapter's own wait-until hook (configured at build
    /// time) takes precedence over the per-call hook.
    pub fn schedule_set(
        &self,
        document_id: &str,
        entry: DocumentEntry,
        call_hook: Option<&WaitUntil>,
    ) {
        if !self.backend.is_writable() {
            return;
        }
        if entry == DocumentEntry::NotFound && !self.negative_caching {
            debug!(document_id, "Negative caching disabled, skipping write");
            return;
        }

        let ttl = match entry {
            DocumentEntry::Found(_) => self.ttl,
            DocumentEntry::NotFound => self.not_found_ttl,
        };
        let backend = Arc::clone(&self.backend);
        let key = self.key(document_id);
        let write = async move {
            match backend.set(&key, &entry, ttl).await {
                Ok(()) => debug!(key, "Remote cache write completed"),
                Err(error) => {
                    counter!("persisted_documents_l2_error_total").increment(1);
                    warn!(key, %error, "Remote cache write failed");
                }
            }
        };

        match self.wait_until.as_ref().or(call_hook) {
            Some(hook) => hook(Box::pin(write)),
            None => {
                tokio::spawn(write);
            }
        }
    }
}

fn normalize_ttl(seconds: Option<i64>, option: &'static str) -> Option<Duration> {
    match seconds {
        None => None,
        Some(value) if value < 0 => {
            warn!(option, value, "Negative TTL treated as no expiry");
            None
        }
        Some(value) => Some(Duration::from_secs(value as u64)),
    }
}

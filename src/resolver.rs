//! Resolution orchestration.
//!
//! `resolve` runs the chain: validate → L1 → single-flight join or lead →
//! L2 → origin → populate tiers → publish one shared outcome to every
//! caller that deduplicated onto the resolution.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use reqwest::header::HeaderMap;
use tokio::sync::watch;
use tracing::debug;

use crate::breaker::BreakerConfig;
use crate::cache::{
    DocumentEntry, DocumentStore, RemoteCache, RemoteCacheAdapter, RemoteLookup, WaitUntil,
};
use crate::config::{HttpSettings, ResolverConfig};
use crate::document_id::DocumentId;
use crate::error::{ConfigError, ResolveError};
use crate::origin::{CdnHttpFetch, HttpFetch, OriginFetcher};
use crate::telemetry;

/// Per-request context passed by the host.
#[derive(Default, Clone)]
pub struct ResolveContext {
    /// Host hook keeping detached cache writes alive past the response
    /// (serverless `waitUntil`). A hook configured on the builder takes
    /// precedence over this one.
    pub wait_until: Option<WaitUntil>,
}

/// Request metadata consulted by the arbitrary-documents policy.
#[derive(Default)]
pub struct RequestContext<'a> {
    pub headers: Option<&'a HeaderMap>,
}

/// Whether the host should accept non-persisted (arbitrary) GraphQL
/// documents alongside persisted ones. Pure configuration passthrough; the
/// resolver itself never inspects document contents.
#[derive(Clone)]
pub enum ArbitraryDocumentsPolicy {
    Flag(bool),
    Predicate(Arc<dyn Fn(&RequestContext<'_>) -> bool + Send + Sync>),
}

impl Default for ArbitraryDocumentsPolicy {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl fmt::Debug for ArbitraryDocumentsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(allow) => f.debug_tuple("Flag").field(allow).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

type SharedOutcome = Result<Option<Arc<str>>, ResolveError>;
type OutcomeReceiver = watch::Receiver<Option<SharedOutcome>>;

/// Multi-tier cached resolver for persisted documents.
///
/// Cheap to clone; all clones share the same caches, breakers, and
/// in-flight map.
#[derive(Clone)]
pub struct PersistedDocumentResolver {
    inner: Arc<Inner>,
}

impl fmt::Debug for PersistedDocumentResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedDocumentResolver")
            .finish_non_exhaustive()
    }
}

struct Inner {
    store: DocumentStore,
    remote: Option<RemoteCacheAdapter>,
    origin: OriginFetcher,
    in_flight: DashMap<String, OutcomeReceiver>,
    arbitrary_documents: ArbitraryDocumentsPolicy,
}

impl PersistedDocumentResolver {
    pub fn builder() -> PersistedDocumentResolverBuilder {
        PersistedDocumentResolverBuilder::default()
    }

    /// Resolve a document id to its body, `None` for a confirmed absence.
    pub async fn resolve(&self, document_id: &str) -> Result<Option<Arc<str>>, ResolveError> {
        self.resolve_with_context(document_id, &ResolveContext::default())
            .await
    }

    pub async fn resolve_with_context(
        &self,
        document_id: &str,
        context: &ResolveContext,
    ) -> Result<Option<Arc<str>>, ResolveError> {
        // Validation happens before any cache or network access.
        DocumentId::parse(document_id)?;

        // Any settled L1 entry, found or not-found, short-circuits.
        if let Some(entry) = self.inner.store.get(document_id) {
            return Ok(entry.body());
        }

        // Single-flight: the entry API makes check-then-insert one atomic
        // step, so at most one L2 lookup and one origin chain runs per id.
        let mut receiver = match self.inner.in_flight.entry(document_id.to_string()) {
            Entry::Occupied(occupied) => {
                counter!("persisted_documents_dedup_join_total").increment(1);
                debug!(document_id, "Joining in-flight resolution");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let (sender, receiver) = watch::channel(None);
                vacant.insert(receiver.clone());
                self.spawn_resolution(document_id.to_string(), sender, context.wait_until.clone());
                receiver
            }
        };

        match receiver.wait_for(|outcome| outcome.is_some()).await {
            Ok(settled) => match settled.clone() {
                Some(outcome) => outcome,
                None => Err(ResolveError::LookupFailed),
            },
            // The resolution task dropped its sender without publishing.
            Err(_) => Err(ResolveError::LookupFailed),
        }
    }

    /// Configuration passthrough for the host's document admission policy.
    pub fn allow_arbitrary_documents(&self, context: &RequestContext<'_>) -> bool {
        match &self.inner.arbitrary_documents {
            ArbitraryDocumentsPolicy::Flag(allow) => *allow,
            ArbitraryDocumentsPolicy::Predicate(predicate) => predicate(context),
        }
    }

    /// Tear down all circuit breakers. Invoke during process shutdown;
    /// subsequent resolutions that reach the origin fail fast.
    pub fn dispose(&self) {
        self.inner.origin.shutdown();
    }

    /// A resolution, once started, runs to completion and clears its
    /// in-flight slot even if the initiating caller goes away, so the work
    /// is detached and the leader waits on the receiver like any follower.
    fn spawn_resolution(
        &self,
        document_id: String,
        sender: watch::Sender<Option<SharedOutcome>>,
        wait_until: Option<WaitUntil>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner
                .run_resolution(&document_id, wait_until.as_ref())
                .await;
            // Clear the slot before publishing so a caller arriving after
            // the publish starts a fresh resolution instead of reading a
            // dead receiver.
            inner.in_flight.remove(&document_id);
            let _ = sender.send(Some(outcome));
        });
    }
}

impl Inner {
    async fn run_resolution(
        &self,
        document_id: &str,
        wait_until: Option<&WaitUntil>,
    ) -> SharedOutcome {
        if let Some(remote) = &self.remote {
            match remote.get(document_id).await {
                RemoteLookup::Found(body) => {
                    debug!(document_id, "Resolved from distributed cache");
                    let entry = DocumentEntry::Found(Arc::from(body));
                    self.store.put(document_id.to_string(), entry.clone());
                    return Ok(entry.body());
                }
                RemoteLookup::NotFound => {
                    debug!(document_id, "Distributed cache recorded a confirmed absence");
                    self.store
                        .put(document_id.to_string(), DocumentEntry::NotFound);
                    return Ok(None);
                }
                RemoteLookup::Miss => {}
            }
        }

        // Already validated by the caller; re-parse to borrow segments.
        let document = DocumentId::parse(document_id)?;
        match self.origin.fetch_document(&document).await {
            Ok(Some(body)) => {
                let entry = DocumentEntry::Found(Arc::from(body));
                self.store.put(document_id.to_string(), entry.clone());
                if let Some(remote) = &self.remote {
                    remote.schedule_set(document_id, entry.clone(), wait_until);
                }
                Ok(entry.body())
            }
            Ok(None) => {
                self.store
                    .put(document_id.to_string(), DocumentEntry::NotFound);
                if let Some(remote) = &self.remote {
                    remote.schedule_set(document_id, DocumentEntry::NotFound, wait_until);
                }
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}

/// Builder for [`PersistedDocumentResolver`].
#[derive(Default)]
pub struct PersistedDocumentResolverBuilder {
    endpoint: Option<String>,
    mirror_endpoint: Option<String>,
    access_token: Option<String>,
    l1_capacity: Option<usize>,
    l2_key_prefix: Option<String>,
    l2_ttl_seconds: Option<i64>,
    l2_not_found_ttl_seconds: Option<i64>,
    breaker: Option<BreakerConfig>,
    http: Option<HttpSettings>,
    remote_cache: Option<Arc<dyn RemoteCache>>,
    http_fetch: Option<Arc<dyn HttpFetch>>,
    wait_until: Option<WaitUntil>,
    arbitrary_documents: Option<ArbitraryDocumentsPolicy>,
}

impl PersistedDocumentResolverBuilder {
    /// Seed the builder from a deserialized configuration block.
    pub fn from_config(config: ResolverConfig) -> Self {
        Self {
            endpoint: non_empty(Some(config.cdn_endpoint)),
            mirror_endpoint: non_empty(config.cdn_mirror_endpoint),
            access_token: non_empty(Some(config.cdn_access_token)),
            l1_capacity: Some(config.l1_capacity),
            l2_key_prefix: Some(config.l2_key_prefix),
            l2_ttl_seconds: config.l2_ttl_seconds,
            l2_not_found_ttl_seconds: Some(config.l2_not_found_ttl_seconds),
            breaker: Some(config.breaker),
            http: Some(config.http),
            ..Default::default()
        }
    }

    /// Primary CDN endpoint base URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = non_empty(Some(endpoint.into()));
        self
    }

    /// Mirror endpoint base URL, tried when the primary fails.
    pub fn mirror_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.mirror_endpoint = non_empty(Some(endpoint.into()));
        self
    }

    /// CDN access token sent as `X-Hive-CDN-Key`.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = non_empty(Some(token.into()));
        self
    }

    /// Maximum entries in the in-process cache.
    /// Default: 10,000 entries.
    pub fn l1_capacity(mut self, capacity: usize) -> Self {
        self.l1_capacity = Some(capacity);
        self
    }

    /// Distributed cache backend; without one the resolver runs L1-only.
    pub fn remote_cache(mut self, cache: Arc<dyn RemoteCache>) -> Self {
        self.remote_cache = Some(cache);
        self
    }

    /// Key prefix for distributed cache entries.
    pub fn l2_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.l2_key_prefix = Some(prefix.into());
        self
    }

    /// TTL for positive distributed cache entries.
    /// Default: unset (backend default, usually no expiry).
    pub fn l2_ttl_seconds(mut self, seconds: i64) -> Self {
        self.l2_ttl_seconds = Some(seconds);
        self
    }

    /// TTL for negative distributed cache entries; `0` disables negative
    /// caching. Default: 60 seconds.
    pub fn l2_not_found_ttl_seconds(mut self, seconds: i64) -> Self {
        self.l2_not_found_ttl_seconds = Some(seconds);
        self
    }

    /// Circuit breaker thresholds applied to every endpoint.
    pub fn breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = Some(config);
        self
    }

    /// Outbound HTTP client settings.
    pub fn http(mut self, settings: HttpSettings) -> Self {
        self.http = Some(settings);
        self
    }

    /// Custom HTTP implementation replacing the built-in `reqwest` client.
    pub fn http_fetch(mut self, fetch: Arc<dyn HttpFetch>) -> Self {
        self.http_fetch = Some(fetch);
        self
    }

    /// Config-level wait-until hook for detached cache writes. Takes
    /// precedence over the per-call hook.
    pub fn wait_until(mut self, hook: WaitUntil) -> Self {
        self.wait_until = Some(hook);
        self
    }

    /// Admission policy for non-persisted documents. Default: deny.
    pub fn allow_arbitrary_documents(mut self, policy: ArbitraryDocumentsPolicy) -> Self {
        self.arbitrary_documents = Some(policy);
        self
    }

    pub fn build(self) -> Result<PersistedDocumentResolver, ConfigError> {
        telemetry::describe_metrics();

        let endpoint = self
            .endpoint
            .ok_or(ConfigError::MissingOption("cdn_endpoint"))?;
        let access_token = self
            .access_token
            .ok_or(ConfigError::MissingOption("cdn_access_token"))?;

        let mut config = ResolverConfig::new(endpoint, access_token);
        config.cdn_mirror_endpoint = self.mirror_endpoint;
        if let Some(capacity) = self.l1_capacity {
            config.l1_capacity = capacity;
        }
        if let Some(prefix) = self.l2_key_prefix {
            config.l2_key_prefix = prefix;
        }
        config.l2_ttl_seconds = self.l2_ttl_seconds;
        if let Some(seconds) = self.l2_not_found_ttl_seconds {
            config.l2_not_found_ttl_seconds = seconds;
        }
        if let Some(breaker) = self.breaker {
            config.breaker = breaker;
        }
        if let Some(http) = self.http {
            config.http = http;
        }

        let fetcher: Arc<dyn HttpFetch> = match self.http_fetch {
            Some(fetch) => fetch,
            None => Arc::new(CdnHttpFetch::new(&config.http)?),
        };
        let origin = OriginFetcher::new(
            config.endpoints(),
            &config.cdn_access_token,
            &config.breaker,
            fetcher,
        )?;
        let store = DocumentStore::new(config.l1_capacity_non_zero());
        let remote = self.remote_cache.map(|backend| {
            RemoteCacheAdapter::new(
                backend,
                config.l2_key_prefix.clone(),
                config.l2_ttl_seconds,
                config.l2_not_found_ttl_seconds,
                self.wait_until,
            )
        });

        Ok(PersistedDocumentResolver {
            inner: Arc::new(Inner {
                store,
                remote,
                origin,
                in_flight: DashMap::new(),
                arbitrary_documents: self.arbitrary_documents.unwrap_or_default(),
            }),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

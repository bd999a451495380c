//! Persisted GraphQL document resolution with multi-tier caching.
//!
//! Gateways hand this crate a document id of the form `name~version~hash`
//! and get back the document body, a confirmed absence, or an error. The
//! resolution chain:
//!
//! 1. **Validation** — structural checks before any I/O.
//! 2. **L1** — bounded in-process LRU holding bodies and confirmed
//!    absences (negative caching).
//! 3. **Single-flight** — concurrent callers for the same id share one
//!    resolution.
//! 4. **L2** — optional distributed cache behind the [`RemoteCache`]
//!    trait, fail-open with fire-and-forget writes.
//! 5. **Origin** — the CDN, primary then mirror, each endpoint guarded by
//!    its own circuit breaker.
//!
//! ```no_run
//! use persisted_documents::PersistedDocumentResolver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = PersistedDocumentResolver::builder()
//!     .endpoint("https://cdn.graphql-hive.com/artifacts/v1/target")
//!     .access_token("cdn-access-token")
//!     .build()?;
//!
//! match resolver.resolve("graphql-hive~v0.0.0~sha512:123").await? {
//!     Some(body) => println!("document: {body}"),
//!     None => println!("document does not exist"),
//! }
//!
//! resolver.dispose();
//! # Ok(())
//! # }
//! ```
//!
//! Logging goes through the `tracing` facade and metrics through the
//! `metrics` facade; the host installs the subscriber and recorder.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod document_id;
pub mod error;
pub mod origin;
pub mod resolver;
mod telemetry;

pub use breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
pub use cache::{
    DocumentEntry, DocumentStore, NOT_FOUND_SENTINEL, RemoteCache, RemoteCacheAdapter,
    RemoteCacheError, RemoteLookup, WaitUntil,
};
pub use config::{HttpSettings, ResolverConfig};
pub use document_id::DocumentId;
pub use error::{ConfigError, ResolveError};
pub use origin::{CDN_KEY_HEADER, CdnHttpFetch, FetchError, FetchResponse, HttpFetch, OriginFetcher};
pub use resolver::{
    ArbitraryDocumentsPolicy, PersistedDocumentResolver, PersistedDocumentResolverBuilder,
    RequestContext, ResolveContext,
};

//! Origin CDN fetcher with primary/mirror failover.
//!
//! Endpoints are tried in declared order, each through its own circuit
//! breaker. A 200 or 404 is a definitive answer and stops the iteration;
//! anything else moves on to the next endpoint. When every endpoint fails,
//! the last cause is logged and a generic lookup error surfaces.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::breaker::{BreakerConfig, BreakerError, CircuitBreaker};
use crate::config::HttpSettings;
use crate::document_id::DocumentId;
use crate::error::{ConfigError, ResolveError};

/// Access-token header expected by the CDN.
pub const CDN_KEY_HEADER: &str = "X-Hive-CDN-Key";

/// Minimal response shape the resolver needs from an HTTP client.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Transport-level fetch failure (connect, TLS, timeout, body read).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct FetchError(String);

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        Self(error.to_string())
    }
}

/// HTTP seam. The default implementation is [`CdnHttpFetch`]; tests and
/// exotic hosts inject their own.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<FetchResponse, FetchError>;
}

/// Default fetcher backed by a shared `reqwest` client.
pub struct CdnHttpFetch {
    client: reqwest::Client,
}

impl CdnHttpFetch {
    pub fn new(settings: &HttpSettings) -> Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.request_timeout())
            .danger_accept_invalid_certs(settings.accept_invalid_certs);
        if let Some(user_agent) = &settings.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let client = builder
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for CdnHttpFetch {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<FetchResponse, FetchError> {
        let response = self.client.get(url).headers(headers.clone()).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(FetchResponse { status, body })
    }
}

/// Per-endpoint attempt failure. Absorbed within a resolution; only the
/// last one is logged when every endpoint has been exhausted.
#[derive(Debug, Error)]
pub(crate) enum EndpointError {
    #[error("unexpected CDN response status {status}")]
    UnexpectedStatus { status: u16 },
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error(transparent)]
    Breaker(#[from] BreakerError),
}

impl EndpointError {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::UnexpectedStatus { .. } => "ERESPONSE",
            Self::Transport(_) => "EFETCH",
            Self::Breaker(err) => err.code(),
        }
    }
}

struct Endpoint {
    base_url: String,
    breaker: CircuitBreaker,
}

/// Resolves documents against the origin CDN when no cache tier has them.
pub struct OriginFetcher {
    endpoints: Vec<Endpoint>,
    fetcher: Arc<dyn HttpFetch>,
    headers: HeaderMap,
}

impl OriginFetcher {
    /// `endpoints` are base URLs in failover order: primary first, then an
    /// optional mirror. Each gets its own independent breaker.
    pub fn new(
        endpoints: Vec<String>,
        access_token: &str,
        breaker_config: &BreakerConfig,
        fetcher: Arc<dyn HttpFetch>,
    ) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::MissingOption("cdn_endpoint"));
        }

        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(access_token).map_err(|_| {
            ConfigError::invalid_option("cdn_access_token", "not a valid header value")
        })?;
        headers.insert(CDN_KEY_HEADER, token);

        let endpoints = endpoints
            .into_iter()
            .map(|base_url| {
                let base_url = base_url.trim_end_matches('/').to_string();
                let breaker = CircuitBreaker::new(base_url.clone(), breaker_config.clone());
                Endpoint { base_url, breaker }
            })
            .collect();

        Ok(Self {
            endpoints,
            fetcher,
            headers,
        })
    }

    /// Fetch a document from the origin. `Ok(Some)` on 200, `Ok(None)` on a
    /// definitive 404 (eligible for negative caching), `Err` only when every
    /// endpoint has been exhausted without a definitive answer.
    pub async fn fetch_document(
        &self,
        document: &DocumentId<'_>,
    ) -> Result<Option<String>, ResolveError> {
        let path = document.cdn_path();
        let mut last_error: Option<EndpointError> = None;

        for endpoint in &self.endpoints {
            match self.try_endpoint(endpoint, &path).await {
                Ok(outcome) => {
                    let label = if outcome.is_some() { "found" } else { "not_found" };
                    counter!("persisted_documents_origin_fetch_total", "outcome" => label)
                        .increment(1);
                    return Ok(outcome);
                }
                Err(err) => {
                    warn!(
                        endpoint = %endpoint.base_url,
                        code = err.code(),
                        %err,
                        "CDN endpoint attempt failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        counter!("persisted_documents_origin_fetch_total", "outcome" => "error").increment(1);
        // The cause stays in the logs; the returned error is deliberately
        // generic so endpoint details never reach callers.
        if let Some(err) = &last_error {
            error!(code = err.code(), %err, "All CDN endpoints exhausted");
        }
        Err(ResolveError::LookupFailed)
    }

    async fn try_endpoint(
        &self,
        endpoint: &Endpoint,
        path: &str,
    ) -> Result<Option<String>, EndpointError> {
        endpoint.breaker.try_acquire()?;

        let url = format!("{}/apps/{}", endpoint.base_url, path);
        debug!(url, "Fetching persisted document from CDN");

        match self.fetcher.fetch(&url, &self.headers).await {
            Ok(response) if response.status == 200 => {
                endpoint.breaker.record_success();
                Ok(Some(response.body))
            }
            // 404 is a confirmed absence, not an endpoint failure.
            Ok(response) if response.status == 404 => {
                endpoint.breaker.record_success();
                Ok(None)
            }
            Ok(response) => {
                endpoint.breaker.record_failure();
                Err(EndpointError::UnexpectedStatus {
                    status: response.status,
                })
            }
            Err(err) => {
                endpoint.breaker.record_failure();
                Err(err.into())
            }
        }
    }

    /// Tear down every breaker. Invoked by resolver disposal.
    pub fn shutdown(&self) {
        for endpoint in &self.endpoints {
            endpoint.breaker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Fetch stub that pops scripted results and records requested URLs.
    struct ScriptedFetch {
        script: Mutex<Vec<Result<FetchResponse, FetchError>>>,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedFetch {
        fn new(script: Vec<Result<FetchResponse, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                urls: Mutex::new(Vec::new()),
            })
        }

        fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpFetch for ScriptedFetch {
        async fn fetch(
            &self,
            url: &str,
            headers: &HeaderMap,
        ) -> Result<FetchResponse, FetchError> {
            assert_eq!(
                headers.get(CDN_KEY_HEADER).and_then(|v| v.to_str().ok()),
                Some("token")
            );
            self.urls.lock().unwrap().push(url.to_string());
            let mut script = self.script.lock().unwrap();
            assert!(!script.is_empty(), "unexpected fetch of {url}");
            script.remove(0)
        }
    }

    fn fetcher(endpoints: Vec<&str>, fetch: Arc<ScriptedFetch>) -> OriginFetcher {
        OriginFetcher::new(
            endpoints.into_iter().map(String::from).collect(),
            "token",
            &BreakerConfig {
                volume_threshold: 1,
                error_threshold_percentage: 1,
                ..Default::default()
            },
            fetch,
        )
        .expect("valid origin config")
    }

    fn doc(raw: &str) -> DocumentId<'_> {
        DocumentId::parse(raw).expect("valid document id")
    }

    #[tokio::test]
    async fn success_builds_expected_url() {
        let fetch = ScriptedFetch::new(vec![Ok(FetchResponse::new(200, "query { me }"))]);
        let origin = fetcher(
            vec!["https://cdn.localhost/artifacts/v1/target"],
            Arc::clone(&fetch),
        );

        let body = origin
            .fetch_document(&doc("graphql-hive~v0.0.0~sha512:123"))
            .await
            .expect("fetch succeeds");

        assert_eq!(body.as_deref(), Some("query { me }"));
        assert_eq!(
            fetch.urls(),
            ["https://cdn.localhost/artifacts/v1/target/apps/graphql-hive/v0.0.0/sha512:123"]
        );
    }

    #[tokio::test]
    async fn not_found_is_definitive() {
        let fetch = ScriptedFetch::new(vec![Ok(FetchResponse::new(404, ""))]);
        let origin = fetcher(
            vec!["https://cdn.localhost", "https://mirror.localhost"],
            Arc::clone(&fetch),
        );

        let body = origin.fetch_document(&doc("a~b~c")).await.expect("404 is ok");

        assert_eq!(body, None);
        // The mirror is never consulted after a definitive answer.
        assert_eq!(fetch.urls().len(), 1);
    }

    #[tokio::test]
    async fn primary_failure_falls_back_to_mirror() {
        let fetch = ScriptedFetch::new(vec![
            Err(FetchError::new("connection refused")),
            Ok(FetchResponse::new(200, "mirror copy")),
        ]);
        let origin = fetcher(
            vec!["https://cdn.localhost", "https://mirror.localhost"],
            Arc::clone(&fetch),
        );

        let body = origin
            .fetch_document(&doc("a~b~c"))
            .await
            .expect("mirror answers");

        assert_eq!(body.as_deref(), Some("mirror copy"));
        assert_eq!(
            fetch.urls(),
            [
                "https://cdn.localhost/apps/a/b/c",
                "https://mirror.localhost/apps/a/b/c"
            ]
        );
    }

    #[tokio::test]
    async fn mirror_404_after_primary_failure_is_definitive() {
        let fetch = ScriptedFetch::new(vec![
            Ok(FetchResponse::new(500, "")),
            Ok(FetchResponse::new(404, "")),
        ]);
        let origin = fetcher(
            vec!["https://cdn.localhost", "https://mirror.localhost"],
            Arc::clone(&fetch),
        );

        let body = origin.fetch_document(&doc("a~b~c")).await.expect("404 wins");
        assert_eq!(body, None);
    }

    #[tokio::test]
    async fn exhaustion_yields_generic_error() {
        let fetch = ScriptedFetch::new(vec![
            Ok(FetchResponse::new(500, "")),
            Err(FetchError::new("timed out")),
        ]);
        let origin = fetcher(
            vec!["https://cdn.localhost", "https://mirror.localhost"],
            Arc::clone(&fetch),
        );

        let err = origin
            .fetch_document(&doc("a~b~c"))
            .await
            .expect_err("all endpoints failed");

        assert_eq!(err, ResolveError::LookupFailed);
        assert_eq!(err.to_string(), "Failed to look up persisted operation");
    }

    #[tokio::test]
    async fn open_breaker_skips_network_entirely() {
        // One scripted failure; the second resolution must not fetch at all.
        let fetch = ScriptedFetch::new(vec![Err(FetchError::new("connection refused"))]);
        let origin = fetcher(vec!["https://cdn.localhost"], Arc::clone(&fetch));

        origin
            .fetch_document(&doc("a~b~c"))
            .await
            .expect_err("first attempt fails");

        let err = origin
            .fetch_document(&doc("x~y~z"))
            .await
            .expect_err("breaker rejects");
        assert_eq!(err, ResolveError::LookupFailed);
        assert_eq!(fetch.urls().len(), 1);
    }

    #[tokio::test]
    async fn open_primary_breaker_goes_straight_to_mirror() {
        let fetch = ScriptedFetch::new(vec![
            Err(FetchError::new("connection refused")),
            Ok(FetchResponse::new(200, "mirror copy")),
            Ok(FetchResponse::new(200, "mirror again")),
        ]);
        let origin = fetcher(
            vec!["https://cdn.localhost", "https://mirror.localhost"],
            Arc::clone(&fetch),
        );

        origin
            .fetch_document(&doc("a~b~c"))
            .await
            .expect("mirror answers");

        // Primary breaker is open now; a different id skips it without a call.
        origin
            .fetch_document(&doc("x~y~z"))
            .await
            .expect("mirror answers again");

        assert_eq!(
            fetch.urls(),
            [
                "https://cdn.localhost/apps/a/b/c",
                "https://mirror.localhost/apps/a/b/c",
                "https://mirror.localhost/apps/x/y/z"
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_fails_fast() {
        let fetch = ScriptedFetch::new(vec![]);
        let origin = fetcher(vec!["https://cdn.localhost"], Arc::clone(&fetch));

        origin.shutdown();

        let err = origin
            .fetch_document(&doc("a~b~c"))
            .await
            .expect_err("shut down");
        assert_eq!(err, ResolveError::LookupFailed);
        assert!(fetch.urls().is_empty());
    }

    #[test]
    fn endpoint_error_codes() {
        assert_eq!(EndpointError::from(BreakerError::Open).code(), "EOPENBREAKER");
        assert_eq!(
            EndpointError::UnexpectedStatus { status: 500 }.code(),
            "ERESPONSE"
        );
        assert_eq!(
            EndpointError::from(FetchError::new("boom")).code(),
            "EFETCH"
        );
    }
}

//! Resolver configuration.
//!
//! Typed settings with serde defaults so hosts can deserialize the whole
//! block from their own configuration file and hand it to the builder.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::breaker::BreakerConfig;

// Default values for resolver configuration
const DEFAULT_L1_CAPACITY: usize = 10_000;
const DEFAULT_L2_KEY_PREFIX: &str = "persisted-document:";
const DEFAULT_L2_NOT_FOUND_TTL_SECONDS: i64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Resolver configuration block.
///
/// `cdn_endpoint` and `cdn_access_token` are required; everything else has
/// a default. When `cdn_mirror_endpoint` is set, the primary endpoint is
/// tried first and the mirror is the fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Primary CDN endpoint base URL.
    pub cdn_endpoint: String,
    /// Optional mirror endpoint base URL, tried after the primary.
    #[serde(default)]
    pub cdn_mirror_endpoint: Option<String>,
    /// CDN access token sent as `X-Hive-CDN-Key` on every request.
    pub cdn_access_token: String,
    /// Maximum entries in the in-process L1 cache.
    #[serde(default = "default_l1_capacity")]
    pub l1_capacity: usize,
    /// Prefix applied to every L2 cache key for namespace sharing.
    #[serde(default = "default_l2_key_prefix")]
    pub l2_key_prefix: String,
    /// TTL for positive L2 entries; unset means no expiry (cache default).
    #[serde(default)]
    pub l2_ttl_seconds: Option<i64>,
    /// TTL for negative (not-found) L2 entries. `0` disables negative
    /// caching entirely; a negative value degrades to "no expiry" with a
    /// warning.
    #[serde(default = "default_l2_not_found_ttl_seconds")]
    pub l2_not_found_ttl_seconds: i64,
    /// Per-endpoint circuit breaker thresholds.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Outbound HTTP client settings.
    #[serde(default)]
    pub http: HttpSettings,
}

impl ResolverConfig {
    pub fn new(cdn_endpoint: impl Into<String>, cdn_access_token: impl Into<String>) -> Self {
        Self {
            cdn_endpoint: cdn_endpoint.into(),
            cdn_mirror_endpoint: None,
            cdn_access_token: cdn_access_token.into(),
            l1_capacity: DEFAULT_L1_CAPACITY,
            l2_key_prefix: DEFAULT_L2_KEY_PREFIX.to_string(),
            l2_ttl_seconds: None,
            l2_not_found_ttl_seconds: DEFAULT_L2_NOT_FOUND_TTL_SECONDS,
            breaker: BreakerConfig::default(),
            http: HttpSettings::default(),
        }
    }

    /// Returns the L1 capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn l1_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.l1_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Endpoint base URLs in failover order, trailing slashes trimmed.
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints = vec![self.cdn_endpoint.trim_end_matches('/').to_string()];
        if let Some(mirror) = &self.cdn_mirror_endpoint {
            let mirror = mirror.trim_end_matches('/');
            if !mirror.is_empty() {
                endpoints.push(mirror.to_string());
            }
        }
        endpoints
    }
}

/// Outbound HTTP client settings for CDN requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Connection timeout for CDN requests.
    pub connect_timeout_secs: u64,
    /// Total request timeout for CDN requests.
    pub request_timeout_secs: u64,
    /// Optional User-Agent header sent with each request.
    pub user_agent: Option<String>,
    /// Accept invalid TLS certificates. Intended for local development
    /// against a self-signed CDN only.
    pub accept_invalid_certs: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_agent: None,
            accept_invalid_certs: false,
        }
    }
}

impl HttpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_l1_capacity() -> usize {
    DEFAULT_L1_CAPACITY
}

fn default_l2_key_prefix() -> String {
    DEFAULT_L2_KEY_PREFIX.to_string()
}

fn default_l2_not_found_ttl_seconds() -> i64 {
    DEFAULT_L2_NOT_FOUND_TTL_SECONDS
}

use thiserror::Error;

/// Caller-visible resolution failure.
///
/// Everything else that can go wrong during a resolution (cache-tier
/// outages, per-endpoint transport errors, open breakers) is absorbed and
/// logged; a caller only ever sees one of these two cases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The document id failed structural validation. Raised before any
    /// cache or network access.
    #[error("{reason}")]
    InvalidDocumentId { reason: &'static str },
    /// Every configured CDN endpoint was exhausted without a definitive
    /// answer. The underlying cause is logged, never carried here, so
    /// endpoint details do not leak to callers.
    #[error("Failed to look up persisted operation")]
    LookupFailed,
}

impl ResolveError {
    pub fn invalid_document_id(reason: &'static str) -> Self {
        Self::InvalidDocumentId { reason }
    }

    /// Stable machine-readable code for API error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDocumentId { .. } => "INVALID_DOCUMENT_ID",
            Self::LookupFailed => "PERSISTED_DOCUMENT_LOOKUP_FAILURE",
        }
    }

    /// HTTP-equivalent status for API error payloads.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidDocumentId { .. } => 400,
            Self::LookupFailed => 500,
        }
    }
}

/// Resolver construction failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration option: {0}")]
    MissingOption(&'static str),
    #[error("configuration option `{option}` is invalid: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },
    #[error("failed to construct HTTP client: {0}")]
    HttpClient(String),
}

impl ConfigError {
    pub fn invalid_option(option: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            reason: reason.into(),
        }
    }
}

//! Document identifier validation.
//!
//! A persisted document id has the shape `name~version~hash`. Ids are
//! validated up front; an id that fails validation never reaches a cache
//! tier, a circuit breaker, or the network.

use crate::error::ResolveError;

/// Segment separator on the wire. The CDN path uses slashes instead; the
/// translation between the two is this crate's responsibility.
pub const SEGMENT_SEPARATOR: char = '~';

/// A validated document identifier, borrowing from the raw id string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentId<'a> {
    name: &'a str,
    version: &'a str,
    hash: &'a str,
}

impl<'a> DocumentId<'a> {
    /// Parse and validate a raw document id.
    ///
    /// Rules are checked in order and the first failure wins:
    /// non-empty input, exactly three `~`-separated segments, then each of
    /// name, version, and hash non-empty after trimming.
    pub fn parse(raw: &'a str) -> Result<Self, ResolveError> {
        if raw.is_empty() {
            return Err(ResolveError::invalid_document_id(
                "Document id cannot be empty",
            ));
        }

        let mut segments = raw.split(SEGMENT_SEPARATOR);
        let (Some(name), Some(version), Some(hash), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(ResolveError::invalid_document_id(
                "Invalid document id format",
            ));
        };

        if name.trim().is_empty() {
            return Err(ResolveError::invalid_document_id("Name cannot be empty"));
        }
        if version.trim().is_empty() {
            return Err(ResolveError::invalid_document_id("Version cannot be empty"));
        }
        if hash.trim().is_empty() {
            return Err(ResolveError::invalid_document_id("Hash cannot be empty"));
        }

        Ok(Self {
            name,
            version,
            hash,
        })
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn version(&self) -> &'a str {
        self.version
    }

    pub fn hash(&self) -> &'a str {
        self.hash
    }

    /// CDN artifact path for this id: `name/version/hash`.
    pub fn cdn_path(&self) -> String {
        format!("{}/{}/{}", self.name, self.version, self.hash)
    }
}

//! Distribution catalog client capability.

use async_trait::async_trait;
use bytes::Bytes;
use trellis_core::{Distribution, FrameworkVersion, Integrity, LibraryManifestEntry, Version};

/// Downloaded library artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryArtifact {
    /// Raw artifact bytes
    pub bytes: Bytes,
    /// Integrity the distribution publishes for the artifact
    pub integrity: Integrity,
}

/// Catalog or artifact fetch failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Request could not be sent or the connection broke
    #[error("Request to {url} failed: {reason}")]
    Transport {
        /// Requested URL
        url: String,
        /// Underlying error
        reason: String,
        /// Whether a retry may succeed
        transient: bool,
    },

    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Response body could not be decoded
    #[error("Malformed response from {url}: {reason}")]
    Decode {
        /// Requested URL
        url: String,
        /// Decoder error
        reason: String,
    },

    /// Resource is not published by the distribution
    #[error("{what} not found")]
    NotFound {
        /// Missing resource
        what: String,
    },

    /// One attempt exceeded its deadline
    #[error("Attempt timed out after {millis} ms")]
    Timeout {
        /// Deadline in milliseconds
        millis: u64,
    },

    /// Every attempt failed transiently
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether retrying the same request may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { transient, .. } => *transient,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Timeout { .. } => true,
            Self::Decode { .. } | Self::NotFound { .. } | Self::Exhausted { .. } => false,
        }
    }
}

/// Access to the releases and artifacts of one distribution
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Distribution served by this client
    fn distribution(&self) -> Distribution;

    /// Fetch every released version with its library manifest
    ///
    /// # Errors
    ///
    /// Returns error if the catalog cannot be retrieved or decoded
    async fn fetch_catalog(&self) -> Result<Vec<FrameworkVersion>, FetchError>;

    /// Download one library of a release
    ///
    /// `entry` is the library's manifest entry from the release's catalog.
    ///
    /// # Errors
    ///
    /// Returns error if the artifact cannot be retrieved
    async fn fetch_library(
        &self,
        version: &Version,
        library: &str,
        entry: &LibraryManifestEntry,
    ) -> Result<LibraryArtifact, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let status = |status| FetchError::Status {
            url: "https://cdn.example/versions.json".to_string(),
            status,
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(401).is_transient());
        assert!(FetchError::Timeout { millis: 10 }.is_transient());
        assert!(
            !FetchError::Decode {
                url: "u".to_string(),
                reason: "eof".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_exhausted_is_final() {
        let err = FetchError::Exhausted {
            attempts: 3,
            last: Box::new(FetchError::Timeout { millis: 10 }),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("3 attempts"));
    }
}

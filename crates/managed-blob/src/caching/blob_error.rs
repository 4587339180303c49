use std::time::Duration;

use thiserror::Error;

/// An error that happens when reading, writing or removing a blob.
///
/// Only [`NotFound`](Self::NotFound) has special meaning to the cache: it is the store telling
/// us that the blob does not exist, which is a perfectly valid state to cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    /// The blob does not exist in the store.
    #[error("not found")]
    NotFound,
    /// The store refused access to the blob.
    ///
    /// The attached string contains the store's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The store did not answer in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The store could not be reached or failed in some other way,
    /// like connection loss or a 5xx server response.
    #[error("transport failed: {0}")]
    Transport(String),
    /// The stored content is not valid JSON for the expected type,
    /// or a value failed to serialize.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The key cannot be mapped onto the store.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// An unexpected error in the cache or store itself.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for BlobError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<serde_json::Error> for BlobError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl BlobError {
    /// Whether trying the same write again could possibly succeed.
    ///
    /// Serialization and key problems are deterministic, everything else may be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed(_) | Self::InvalidKey(_))
    }

    /// A short tag for metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
            Self::InvalidKey(_) => "invalid_key",
            Self::InternalError => "internal",
        }
    }

    /// Logs the given error and turns it into an [`InternalError`](Self::InternalError).
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The outcome of a blob operation.
pub type BlobResult<T = ()> = Result<T, BlobError>;

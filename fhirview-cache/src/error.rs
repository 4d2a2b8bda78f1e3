//! Error types for recent-writes cache operations.

use fhirview_query::EngineError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while talking to the recent-writes cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Redis protocol or connection error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Command exceeded the configured timeout.
    #[error("cache command timed out after {0}ms")]
    Timeout(u64),

    /// Entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

// The speed layer is best-effort: every cache failure is transient from the
// engine's point of view, and the serving layer swallows it with a warning.
impl From<CacheError> for EngineError {
    fn from(err: CacheError) -> Self {
        EngineError::transient(err.to_string())
    }
}

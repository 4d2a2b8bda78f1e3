//! Error types for document-store operations.

use fhirview_query::EngineError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Row conversion error.
    #[error("row conversion error: {0}")]
    Conversion(String),

    /// Per-query deadline exceeded.
    #[error("query timed out after {0}ms")]
    Timeout(u64),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a row conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this is a pool or connection failure.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Connection(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            // Pool exhaustion and deadlines are retryable conditions.
            StoreError::Pool(e) => EngineError::transient(format!("pool error: {e}")),
            StoreError::Timeout(ms) => {
                EngineError::transient(format!("query timed out after {ms}ms"))
            }
            StoreError::Postgres(e) => classify_postgres(e),
            StoreError::Config(msg) | StoreError::Connection(msg) => EngineError::fatal(msg),
            StoreError::Conversion(msg) => EngineError::invalid_input(msg),
            StoreError::Internal(msg) => EngineError::fatal(msg),
        }
    }
}

/// Map a PostgreSQL error onto the engine taxonomy by SQLSTATE class:
/// cancellations and resource exhaustion are transient, everything else is
/// fatal.
fn classify_postgres(err: tokio_postgres::Error) -> EngineError {
    if let Some(state) = err.code() {
        let code = state.code();
        // 57014 query_canceled; class 53 insufficient resources.
        if code == "57014" || code.starts_with("53") {
            return EngineError::transient(err.to_string());
        }
    }
    EngineError::fatal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let err = StoreError::Timeout(30_000);
        assert!(err.is_timeout());

        let engine: EngineError = err.into();
        assert!(engine.is_transient());
    }

    #[test]
    fn test_config_maps_to_fatal() {
        let engine: EngineError = StoreError::config("bad url").into();
        assert_eq!(engine.kind(), "fatal");
    }

    #[test]
    fn test_conversion_maps_to_invalid_input() {
        let engine: EngineError = StoreError::conversion("unsupported type").into();
        assert_eq!(engine.kind(), "invalid_input");
    }
}

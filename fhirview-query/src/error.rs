//! Engine-wide error taxonomy.
//!
//! Every component funnels its failures into [`EngineError`] so that callers
//! (and the serving layer's fallback logic) can match on a small, stable set
//! of kinds instead of inspecting driver-specific errors.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the query engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A view definition (or other named entity) does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing entity.
        what: String,
    },

    /// The caller supplied something the engine cannot execute.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// The target materialized view is absent. Recoverable: the serving
    /// layer falls back to the relational runner when it sees this kind.
    #[error("materialized view '{view}' does not exist")]
    NotMaterialized {
        /// Name of the missing view.
        view: String,
    },

    /// A transient condition (pool exhaustion, query cancellation, cache
    /// timeout). Safe to retry; never retried automatically.
    #[error("transient error: {message}")]
    Transient {
        /// Underlying cause.
        message: String,
    },

    /// The integrity validator found orphans or mismatches.
    #[error("integrity failure: {message}")]
    Integrity {
        /// Summary of the failed checks.
        message: String,
    },

    /// The store is unreachable or the schema is missing.
    #[error("fatal error: {message}")]
    Fatal {
        /// Underlying cause.
        message: String,
    },
}

impl EngineError {
    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a not-materialized error for the given view.
    pub fn not_materialized(view: impl Into<String>) -> Self {
        Self::NotMaterialized { view: view.into() }
    }

    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create an integrity-failure error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Check whether this error triggers the relational fallback.
    pub fn is_not_materialized(&self) -> bool {
        matches!(self, Self::NotMaterialized { .. })
    }

    /// Check whether this error is transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short machine-readable kind label, used in API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput { .. } => "invalid_input",
            Self::NotMaterialized { .. } => "not_materialized",
            Self::Transient { .. } => "transient",
            Self::Integrity { .. } => "integrity_failure",
            Self::Fatal { .. } => "fatal",
        }
    }
}

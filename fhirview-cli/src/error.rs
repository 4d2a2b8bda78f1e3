//! CLI error type.

use fhirview_query::EngineError;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors surfaced by the CLI.
#[derive(Error, Debug)]
pub enum CliError {
    /// Engine-level failure.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// A batch operation finished with failures; exit non-zero.
    #[error("{0}")]
    Failed(String),
}

impl CliError {
    /// Create a failure for a completed-but-failed batch operation.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

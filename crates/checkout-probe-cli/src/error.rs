//! CLI error types

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// The run completed but not every invariant passed
    #[error("{failed} of {total} invariant(s) did not pass")]
    RunFailed {
        /// Failed or skipped invariants
        failed: usize,
        /// Evaluated invariants
        total: usize,
    },

    /// Report serialization error
    #[error("Report serialization error: {0}")]
    Report(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Probe error
    #[error("{0}")]
    Probe(#[from] checkout_probe::ProbeError),
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a failed-run error
    #[must_use]
    pub const fn run_failed(failed: usize, total: usize) -> Self {
        Self::RunFailed { failed, total }
    }
}

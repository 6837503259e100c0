//! Error types for Tollgate.

use std::time::Duration;

use thiserror::Error;

use crate::admission::SubmissionError;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Construction-time misuse (zero capacity or zero window)
    #[error("Invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// No permit became available before the deadline
    #[error("No permit acquired within {0:?}")]
    AcquisitionTimeout(Duration),

    /// The caller's cancellation token fired while waiting
    #[error("Permit acquisition cancelled")]
    Cancelled,

    /// The limiter was shut down and has no permits left
    #[error("Rate limiter has been shut down")]
    Shutdown,

    /// A non-blocking submission found no permit
    #[error("Submission throttled: no permit available")]
    Throttled,

    /// The refill task could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The downstream collaborator failed after admission
    #[error("Submission failed: {0}")]
    Submission(#[from] SubmissionError),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

//! Error types for resumable-ingest
//!
//! Storage-layer irregularities (corrupt state, missing files, failed deletes) are
//! absorbed by the components that meet them and only ever surface as log events
//! or counters. The variants here cover what *can* reach a caller:
//! - configuration mistakes ([`Error::Config`])
//! - I/O and serialization failures from explicit write paths
//! - an aborted unit run after the external service blocked us ([`Error::Blocked`])
//!
//! Failures of the external operation itself are reported through
//! [`RetryError`](crate::retry::RetryError), which keeps the caller's own error type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for resumable-ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for resumable-ingest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retention_days")
        key: Option<String>,
    },

    /// State file handling error
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The external service refused further requests; the unit run was aborted
    #[error("external service blocked requests for unit {unit}: {message}")]
    Blocked {
        /// Run-unit that was being processed when the block was detected
        unit: String,
        /// Message of the failure that tripped the breaker
        message: String,
    },
}

impl Error {
    /// Create a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// State file errors
///
/// These are recovered from inside [`crate::state`] and never escape `load`; they
/// exist so that recovery paths log a precise, structured reason.
#[derive(Debug, Error)]
pub enum StateError {
    /// The file could not be parsed as JSON
    #[error("corrupted state file {path}: {reason}")]
    Corrupted {
        /// The state file that failed to parse
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// The file parsed but does not have the expected shape
    #[error("state file {path} has invalid shape: {reason}")]
    InvalidShape {
        /// The offending state file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Writing a new state version failed; the previous version is untouched
    #[error("failed to write state file {path}: {reason}")]
    WriteFailed {
        /// The state file that could not be replaced
        path: PathBuf,
        /// The reason the write failed
        reason: String,
    },
}

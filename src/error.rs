//! Error types for rdslog-dl
//!
//! This module provides error handling for the library, including:
//! - The top-level [`Error`] returned by fallible library operations
//! - [`SourceError`] for failures reported by a [`LogSource`](crate::source::LogSource)
//! - Exit-code mapping for the command-line binary via [`ToExitCode`]

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::InstanceId;

/// Result type alias for rdslog-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for rdslog-dl
///
/// Variants fall into two groups. Fatal ones (`Config`, `Session`, `Listing`) stop a run
/// before any artifact is dispatched. Per-artifact ones (`Fetch`, `Timeout`, `Write`,
/// `InvalidArtifactName`) are folded into an [`ArtifactOutcome`](crate::types::ArtifactOutcome)
/// and never abort sibling artifacts.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_fetches")
        key: Option<String>,
    },

    /// The log source could not be constructed (client setup, credentials)
    #[error("session setup failed: {0}")]
    Session(String),

    /// Enumerating the artifacts of an instance failed
    #[error("failed to list logs for instance {instance}: {source}")]
    Listing {
        /// Instance whose listing failed
        instance: InstanceId,
        /// Underlying source failure
        #[source]
        source: SourceError,
    },

    /// Retrieving a single artifact failed
    #[error("failed to fetch {artifact}: {source}")]
    Fetch {
        /// Logical name of the artifact
        artifact: String,
        /// Underlying source failure
        #[source]
        source: SourceError,
    },

    /// Retrieving a single artifact exceeded the configured deadline
    #[error("fetching {artifact} timed out after {after:?}")]
    Timeout {
        /// Logical name of the artifact
        artifact: String,
        /// The deadline that elapsed
        after: Duration,
    },

    /// Artifact name cannot be mapped onto the destination layout
    #[error("invalid artifact name {name:?}: {reason}")]
    InvalidArtifactName {
        /// The offending logical name
        name: String,
        /// Why the name was rejected
        reason: String,
    },

    /// Invalid instance identifier
    #[error("invalid instance identifier {id:?}: {reason}")]
    InvalidInstance {
        /// The offending identifier
        id: String,
        /// Why the identifier was rejected
        reason: String,
    },

    /// Creating a directory or writing a log file failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// Directory or file path that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// One or more artifacts of a batch did not reach disk
    #[error("{failed} of {total} log files failed ({cancelled} cancelled)")]
    BatchFailed {
        /// Number of artifacts whose fetch or write failed
        failed: usize,
        /// Number of artifacts cancelled before completion
        cancelled: usize,
        /// Batch size
        total: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::Config`] tied to a configuration key.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Failures reported by a log source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure (connect, TLS, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote side answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// The requested instance or log file does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The response body could not be decoded
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Other source failure
    #[error("{0}")]
    Other(String),
}

/// Convert errors to process exit codes for the command-line binary
///
/// Codes are stable so scripts can tell a bad invocation from a remote failure.
pub trait ToExitCode {
    /// Get the process exit code for this error
    fn exit_code(&self) -> u8;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToExitCode for Error {
    fn exit_code(&self) -> u8 {
        match self {
            Error::Config { .. } | Error::InvalidInstance { .. } => 2,
            Error::Session(_) => 3,
            Error::Listing { .. } => 4,
            Error::BatchFailed { .. } => 5,
            _ => 1,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Session(_) => "session_error",
            Error::Listing { .. } => "listing_failed",
            Error::Fetch { .. } => "fetch_failed",
            Error::Timeout { .. } => "fetch_timeout",
            Error::InvalidArtifactName { .. } => "invalid_artifact_name",
            Error::InvalidInstance { .. } => "invalid_instance",
            Error::Write { .. } => "write_failed",
            Error::BatchFailed { .. } => "batch_failed",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

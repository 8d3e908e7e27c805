//! Core types and events for rdslog-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Identifier of the database instance that owns a set of logs
///
/// The identifier becomes a directory name under the output root, so it must be a
/// single, non-traversing path segment.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new InstanceId, rejecting values that are not a single path segment
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("must not be empty")
        } else if id == "." || id == ".." {
            Some("must not be a relative path component")
        } else if id.contains(['/', '\\', '\0']) {
            Some("must not contain path separators")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::InvalidInstance {
                id,
                reason: reason.to_string(),
            }),
            None => Ok(Self(id)),
        }
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InstanceId {
    type Error = Error;

    fn try_from(id: String) -> Result<Self> {
        Self::new(id)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// One remote log file, as returned by the listing call
///
/// `name` is slash-delimited: the first segment is the log group (`error`,
/// `slowquery`, `trace`, ...) and the remainder is the file name inside that group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Logical name, e.g. `error/mysql-error.log`
    pub name: String,
    /// Size in bytes reported by the listing, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Last write time in epoch milliseconds reported by the listing, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_written: Option<i64>,
}

impl ArtifactRef {
    /// Create a reference from its logical name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            last_written: None,
        }
    }

    /// First path segment of the name, or `None` if the name has no separator
    pub fn group(&self) -> Option<&str> {
        self.name.split_once('/').map(|(group, _)| group)
    }

    /// Everything after the first separator, or `None` if the name has no separator
    pub fn leaf(&self) -> Option<&str> {
        self.name.split_once('/').map(|(_, leaf)| leaf)
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// How a single artifact's retrieval ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Content was fetched and written in full
    Written {
        /// File the content was written to
        path: PathBuf,
        /// Number of bytes written
        bytes: u64,
    },
    /// The remote retrieval failed or timed out
    FetchFailed {
        /// Failure cause
        error: String,
    },
    /// Content was fetched but could not be written
    WriteFailed {
        /// Failure cause
        error: String,
    },
    /// The batch was cancelled before this artifact completed
    Cancelled,
}

/// Completion signal for one artifact of a batch
///
/// Exactly one outcome is produced per artifact, whatever happened to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    /// The artifact this outcome belongs to
    pub artifact: ArtifactRef,
    /// What happened
    pub status: ArtifactStatus,
    /// Time from launch to completion (zero for never-launched artifacts)
    pub elapsed: Duration,
}

impl ArtifactOutcome {
    /// True if the artifact ended up on disk
    pub fn is_written(&self) -> bool {
        matches!(self.status, ArtifactStatus::Written { .. })
    }

    /// Failure cause, for fetch and write failures
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            ArtifactStatus::FetchFailed { error } | ArtifactStatus::WriteFailed { error } => {
                Some(error)
            }
            _ => None,
        }
    }
}

/// Aggregate result of a drained batch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    /// Instance the batch belonged to
    pub instance: InstanceId,
    /// Number of artifacts dispatched
    pub total: usize,
    /// Number of artifacts written to disk
    pub written: usize,
    /// Total bytes written across all artifacts
    pub bytes_written: u64,
    /// Outcomes that failed during fetch or write
    pub failures: Vec<ArtifactOutcome>,
    /// Outcomes cancelled before completion
    pub cancelled: Vec<ArtifactOutcome>,
    /// When the batch was dispatched
    pub started_at: DateTime<Utc>,
    /// When the last outcome was drained
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    /// Start an empty report for a batch of `total` artifacts
    pub fn new(instance: InstanceId, total: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            instance,
            total,
            written: 0,
            bytes_written: 0,
            failures: Vec::new(),
            cancelled: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    /// Fold one outcome into the report
    pub fn record(&mut self, outcome: ArtifactOutcome) {
        match &outcome.status {
            ArtifactStatus::Written { bytes, .. } => {
                self.written += 1;
                self.bytes_written += bytes;
            }
            ArtifactStatus::FetchFailed { .. } | ArtifactStatus::WriteFailed { .. } => {
                self.failures.push(outcome)
            }
            ArtifactStatus::Cancelled => self.cancelled.push(outcome),
        }
    }

    /// Number of outcomes recorded so far
    pub fn completed(&self) -> usize {
        self.written + self.failures.len() + self.cancelled.len()
    }

    /// True when every artifact was written
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty() && self.written == self.total
    }

    /// Convert into an error when any artifact did not reach disk
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::BatchFailed {
                failed: self.failures.len(),
                cancelled: self.cancelled.len(),
                total: self.total,
            })
        }
    }
}

/// Event emitted during a fetch run
///
/// Delivered over a broadcast channel; see [`LogFetcher::subscribe`](crate::LogFetcher::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A batch was dispatched
    BatchStarted {
        /// Owning instance
        instance: InstanceId,
        /// Number of artifacts in the batch
        total: usize,
    },

    /// A retrieval task started for an artifact
    ArtifactLaunched {
        /// Logical artifact name
        name: String,
    },

    /// An artifact was written to disk
    ArtifactWritten {
        /// Logical artifact name
        name: String,
        /// Destination file
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },

    /// An artifact failed to fetch or write
    ArtifactFailed {
        /// Logical artifact name
        name: String,
        /// Failure cause
        error: String,
    },

    /// An artifact was cancelled
    ArtifactCancelled {
        /// Logical artifact name
        name: String,
    },

    /// Every outcome of a batch has been delivered
    BatchComplete {
        /// Owning instance
        instance: InstanceId,
        /// Artifacts written
        written: usize,
        /// Artifacts that failed
        failed: usize,
        /// Artifacts cancelled
        cancelled: usize,
    },
}

impl Event {
    /// Build the event that announces an outcome
    pub(crate) fn for_outcome(outcome: &ArtifactOutcome) -> Self {
        let name = outcome.artifact.name.clone();
        match &outcome.status {
            ArtifactStatus::Written { path, bytes } => Event::ArtifactWritten {
                name,
                path: path.clone(),
                bytes: *bytes,
            },
            ArtifactStatus::FetchFailed { error } | ArtifactStatus::WriteFailed { error } => {
                Event::ArtifactFailed {
                    name,
                    error: error.clone(),
                }
            }
            ArtifactStatus::Cancelled => Event::ArtifactCancelled { name },
        }
    }
}

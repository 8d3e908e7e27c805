//! Log sources -- the remote collaborators that enumerate and retrieve log files.
//!
//! - [`LogSource`] - The listing/retrieval interface the fetch pipeline calls
//! - [`HttpLogSource`] - Production source talking to a log gateway over HTTP
//! - [`MemoryLogSource`] - In-process source with scripted payloads, latency and failures

mod http;
mod memory;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{ArtifactRef, InstanceId};

pub use http::HttpLogSource;
pub use memory::MemoryLogSource;

/// Abstraction over the remote log API, enabling testability.
///
/// Implementations must be safe to call concurrently: the fetch pipeline issues many
/// `fetch_artifact` calls against the same source at once.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Enumerate the log files that belong to `instance`, in the order they should be fetched
    async fn list_artifacts(&self, instance: &InstanceId) -> Result<Vec<ArtifactRef>, SourceError>;

    /// Retrieve the full content of one log file
    ///
    /// A log with no data yields an empty vector rather than an error.
    async fn fetch_artifact(
        &self,
        instance: &InstanceId,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, SourceError>;
}

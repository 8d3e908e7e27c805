//! In-process log source with scripted behavior.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::LogSource;
use crate::error::SourceError;
use crate::types::{ArtifactRef, InstanceId};

/// [`LogSource`] serving logs from memory.
///
/// Each log can carry its own latency or a scripted failure, and the source records how
/// many fetches ran at once, which makes it suitable for exercising the fetch pipeline
/// without a network.
///
/// ```
/// use rdslog_dl::MemoryLogSource;
///
/// let source = MemoryLogSource::new()
///     .with_log("mydb", "error/mysql-error.log", "started\n")
///     .with_empty_log("mydb", "slowquery/mysql-slowquery.log");
/// assert_eq!(source.fetch_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryLogSource {
    listings: HashMap<String, Vec<ArtifactRef>>,
    payloads: HashMap<(String, String), Option<Vec<u8>>>,
    fetch_failures: HashMap<String, String>,
    list_failure: Option<String>,
    latencies: HashMap<String, Duration>,
    default_latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

/// Decrements the in-flight counter even when the fetch future is dropped mid-sleep.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryLogSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(mut self, instance: &str, name: &str, payload: Option<Vec<u8>>) -> Self {
        self.listings
            .entry(instance.to_string())
            .or_default()
            .push(ArtifactRef::new(name));
        self.payloads
            .insert((instance.to_string(), name.to_string()), payload);
        self
    }

    /// Add a log with content; listing order follows insertion order
    pub fn with_log(self, instance: &str, name: &str, content: impl Into<Vec<u8>>) -> Self {
        self.insert(instance, name, Some(content.into()))
    }

    /// Add a log whose retrieval returns no data at all
    pub fn with_empty_log(self, instance: &str, name: &str) -> Self {
        self.insert(instance, name, None)
    }

    /// Make every fetch of `name` fail with `message`
    pub fn with_fetch_failure(mut self, name: &str, message: &str) -> Self {
        self.fetch_failures
            .insert(name.to_string(), message.to_string());
        self
    }

    /// Make listing fail with `message`
    pub fn with_list_failure(mut self, message: &str) -> Self {
        self.list_failure = Some(message.to_string());
        self
    }

    /// Delay every fetch of `name` by `latency`
    pub fn with_latency(mut self, name: &str, latency: Duration) -> Self {
        self.latencies.insert(name.to_string(), latency);
        self
    }

    /// Delay fetches that have no per-log latency
    pub fn with_default_latency(mut self, latency: Duration) -> Self {
        self.default_latency = latency;
        self
    }

    /// Number of fetches that have started
    pub fn fetch_count(&self) -> usize {
        self.fetched_names().len()
    }

    /// Names passed to `fetch_artifact`, in call order
    pub fn fetched_names(&self) -> Vec<String> {
        self.fetched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Highest number of fetches observed running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn list_artifacts(&self, instance: &InstanceId) -> Result<Vec<ArtifactRef>, SourceError> {
        if let Some(message) = &self.list_failure {
            return Err(SourceError::Other(message.clone()));
        }
        self.listings
            .get(instance.as_str())
            .cloned()
            .ok_or_else(|| SourceError::NotFound(instance.to_string()))
    }

    async fn fetch_artifact(
        &self,
        instance: &InstanceId,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, SourceError> {
        self.fetched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(artifact.name.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let latency = self
            .latencies
            .get(&artifact.name)
            .copied()
            .unwrap_or(self.default_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(message) = self.fetch_failures.get(&artifact.name) {
            return Err(SourceError::Other(message.clone()));
        }

        match self
            .payloads
            .get(&(instance.to_string(), artifact.name.clone()))
        {
            Some(payload) => Ok(payload.clone().unwrap_or_default()),
            None => Err(SourceError::NotFound(artifact.name.clone())),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_in_insertion_order_and_serves_payloads() {
        let source = MemoryLogSource::new()
            .with_log("mydb", "error/b.log", "b")
            .with_log("mydb", "error/a.log", "a")
            .with_empty_log("mydb", "error/none.log");
        let mydb = InstanceId::new("mydb").unwrap();

        let names: Vec<_> = source
            .list_artifacts(&mydb)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, ["error/b.log", "error/a.log", "error/none.log"]);

        let a = source
            .fetch_artifact(&mydb, &ArtifactRef::new("error/a.log"))
            .await
            .unwrap();
        assert_eq!(a, b"a");
        let none = source
            .fetch_artifact(&mydb, &ArtifactRef::new("error/none.log"))
            .await
            .unwrap();
        assert!(none.is_empty());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn unknown_instance_and_scripted_failures() {
        let source = MemoryLogSource::new()
            .with_log("mydb", "error/a.log", "a")
            .with_fetch_failure("error/a.log", "connection reset");

        let other = InstanceId::new("other").unwrap();
        assert!(matches!(
            source.list_artifacts(&other).await,
            Err(SourceError::NotFound(_))
        ));

        let err = source
            .fetch_artifact(
                &InstanceId::new("mydb").unwrap(),
                &ArtifactRef::new("error/a.log"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
    }
}

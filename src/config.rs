//! Configuration types for rdslog-dl

use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// What a batch does when a remote retrieval fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep fetching the remaining artifacts
    #[default]
    Continue,
    /// Cancel the rest of the batch after the first fetch failure
    ///
    /// Artifacts not yet launched, and fetches still in flight, are reported as
    /// cancelled. Writes that already started are allowed to finish.
    Abort,
}

/// Fetch pipeline behavior (throttling, concurrency, deadlines)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Delay before each retrieval task is launched (default: 500ms)
    ///
    /// Throttles the rate of new requests against the remote service. Zero disables it.
    #[serde(default = "default_launch_delay")]
    pub launch_delay: Duration,

    /// Maximum number of retrievals in flight at once (default: 8)
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Deadline for a single retrieval (None = wait indefinitely)
    #[serde(default)]
    pub fetch_timeout: Option<Duration>,

    /// Behavior on retrieval failure
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Runtime worker threads (None = available parallelism minus one)
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            launch_delay: default_launch_delay(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout: None,
            failure_policy: FailurePolicy::default(),
            worker_threads: None,
        }
    }
}

/// Log gateway connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the log gateway (required by [`HttpLogSource`](crate::HttpLogSource))
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Region the instance lives in (default: "ap-northeast-1")
    #[serde(default = "default_region")]
    pub region: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request HTTP timeout (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            api_token: None,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Main configuration for [`LogFetcher`](crate::LogFetcher)
///
/// Fetch settings are flattened, so a JSON file reads
/// `{"output_dir": "logs", "max_concurrent_fetches": 4, "source": {"region": "us-east-1"}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root directory logs are written under (default: ".")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Fetch pipeline behavior
    #[serde(flatten)]
    pub fetch: FetchConfig,

    /// Log gateway connection
    #[serde(default)]
    pub source: SourceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            fetch: FetchConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file; absent keys take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.fetch.max_concurrent_fetches == 0 {
            return Err(Error::config(
                "max_concurrent_fetches",
                "must be at least 1",
            ));
        }
        if self.fetch.worker_threads == Some(0) {
            return Err(Error::config("worker_threads", "must be at least 1"));
        }
        if self.source.region.trim().is_empty() {
            return Err(Error::config("region", "must not be empty"));
        }
        Ok(())
    }

    /// Worker threads for the multi-thread runtime
    ///
    /// Defaults to available parallelism minus one, leaving a core for the
    /// coordination task, and never less than one.
    pub fn runtime_worker_threads(&self) -> usize {
        self.fetch.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1)
        })
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_launch_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_region() -> String {
    "ap-northeast-1".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.fetch.launch_delay, Duration::from_millis(500));
        assert_eq!(config.fetch.max_concurrent_fetches, 8);
        assert_eq!(config.fetch.fetch_timeout, None);
        assert_eq!(config.fetch.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.source.region, "ap-northeast-1");
        assert_eq!(config.source.request_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.fetch.max_concurrent_fetches, 8);
        assert_eq!(config.source.region, "ap-northeast-1");
    }

    #[test]
    fn fetch_settings_are_flattened() {
        let config: Config = serde_json::from_str(
            r#"{
                "output_dir": "logs",
                "max_concurrent_fetches": 3,
                "failure_policy": "abort",
                "source": {"region": "us-east-1", "endpoint": "http://localhost:9000"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("logs"));
        assert_eq!(config.fetch.max_concurrent_fetches, 3);
        assert_eq!(config.fetch.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.source.region, "us-east-1");
        assert_eq!(
            config.source.endpoint.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.fetch.max_concurrent_fetches = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("max_concurrent_fetches"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_blank_region_and_zero_workers() {
        let mut config = Config::default();
        config.source.region = "  ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetch.worker_threads = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn worker_threads_default_is_at_least_one() {
        assert!(Config::default().runtime_worker_threads() >= 1);

        let mut config = Config::default();
        config.fetch.worker_threads = Some(6);
        assert_eq!(config.runtime_worker_threads(), 6);
    }

    #[test]
    fn from_json_file_reads_and_reports_missing_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rdslog.json");
        std::fs::write(&path, r#"{"launch_delay": {"secs": 0, "nanos": 0}}"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.fetch.launch_delay, Duration::ZERO);

        let missing = Config::from_json_file(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(Error::Config { .. })));
    }
}

//! Fetch pipeline -- concurrent retrieval of an instance's logs onto disk.
//!
//! Split into focused submodules:
//! - [`context`] - Immutable per-batch state shared by every retrieval task
//! - [`dispatch`] - Coordinator: launch delay, concurrency bound, final join
//! - [`task`] - One artifact's fetch, write and outcome
//! - [`handle`] - [`CompletionHandle`] returned to the caller

mod context;
mod dispatch;
mod handle;
mod task;


use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::source::LogSource;
use crate::types::{ArtifactRef, BatchReport, Event, InstanceId};
use crate::writer::ArtifactWriter;

use context::TaskContext;
use dispatch::{LaunchParams, spawn_coordinator};

pub use handle::CompletionHandle;

/// Buffered outcomes before retrieval tasks wait on the caller
const OUTCOME_CHANNEL_BUFFER: usize = 64;

/// Buffered events per subscriber before slow subscribers start lagging
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Fetches every log of a database instance and writes it below the output root.
///
/// Cloning is cheap and clones share the event channel and shutdown token.
///
/// ```no_run
/// use std::sync::Arc;
/// use rdslog_dl::{Config, HttpLogSource, InstanceId, LogFetcher};
///
/// # async fn example() -> rdslog_dl::Result<()> {
/// let config = Config::default();
/// let source = Arc::new(HttpLogSource::new(&config.source)?);
/// let fetcher = LogFetcher::new(config, source)?;
///
/// let report = fetcher.fetch_all(InstanceId::new("proddb")?).await?;
/// println!("{} of {} log files written", report.written, report.total);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LogFetcher {
    config: Arc<Config>,
    source: Arc<dyn LogSource>,
    writer: ArtifactWriter,
    event_tx: broadcast::Sender<Event>,
    shutdown_token: CancellationToken,
}

impl LogFetcher {
    /// Create a fetcher; fails if the configuration is invalid.
    pub fn new(config: Config, source: Arc<dyn LogSource>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            writer: ArtifactWriter::new(config.output_dir.clone()),
            config: Arc::new(config),
            source,
            event_tx,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Subscribe to progress events of every batch this fetcher runs
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Writer used for every artifact
    pub fn writer(&self) -> &ArtifactWriter {
        &self.writer
    }

    /// Enumerate the instance's logs through the source.
    pub async fn list_artifacts(&self, instance: &InstanceId) -> Result<Vec<ArtifactRef>> {
        self.source
            .list_artifacts(instance)
            .await
            .map_err(|source| Error::Listing {
                instance: instance.clone(),
                source,
            })
    }

    /// Start fetching `batch` and return immediately.
    ///
    /// Must be called from within a Tokio runtime. Each artifact is launched in order
    /// after the configured launch delay, with at most `max_concurrent_fetches`
    /// retrievals in flight.
    pub fn dispatch(&self, instance: InstanceId, batch: Vec<ArtifactRef>) -> CompletionHandle {
        let total = batch.len();
        let started_at = chrono::Utc::now();
        let cancel_token = self.shutdown_token.child_token();
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL_BUFFER);

        tracing::info!(
            instance = %instance,
            total,
            max_concurrent = self.config.fetch.max_concurrent_fetches,
            launch_delay_ms = self.config.fetch.launch_delay.as_millis() as u64,
            "Dispatching log batch"
        );
        self.event_tx
            .send(Event::BatchStarted {
                instance: instance.clone(),
                total,
            })
            .ok();

        let ctx = Arc::new(TaskContext {
            instance: instance.clone(),
            source: Arc::clone(&self.source),
            writer: self.writer.clone(),
            fetch_timeout: self.config.fetch.fetch_timeout,
            failure_policy: self.config.fetch.failure_policy,
            cancel_token: cancel_token.clone(),
            event_tx: self.event_tx.clone(),
            outcome_tx,
        });
        let coordinator = spawn_coordinator(
            ctx,
            batch,
            LaunchParams {
                launch_delay: self.config.fetch.launch_delay,
                max_concurrent: self.config.fetch.max_concurrent_fetches,
            },
        );

        CompletionHandle::new(
            outcome_rx,
            BatchReport::new(instance, total, started_at),
            cancel_token,
            self.event_tx.clone(),
            coordinator,
        )
    }

    /// List, dispatch and drain: fetch every log of `instance`.
    ///
    /// Listing failures are returned as [`Error::Listing`] before anything is fetched.
    /// Per-artifact failures are recorded in the report; use
    /// [`BatchReport::into_result`] to treat them as an error.
    pub async fn fetch_all(&self, instance: InstanceId) -> Result<BatchReport> {
        let batch = self.list_artifacts(&instance).await?;
        Ok(self.dispatch(instance, batch).drain().await)
    }

    /// Cancel every batch started by this fetcher (and its clones).
    pub fn shutdown(&self) {
        tracing::info!("Shutting down log fetcher");
        self.shutdown_token.cancel();
    }
}

//! # rdslog-dl
//!
//! Concurrent downloader for the error, slow-query and audit logs of a managed
//! database instance.
//!
//! Logs are listed through a [`LogSource`], fetched concurrently with a bounded number of
//! requests in flight and a fixed delay between launches, and written to
//! `<output_dir>/<instance>/<group>/<file>`. Every log of a batch yields exactly one
//! [`ArtifactOutcome`], so one failed download never hides or corrupts the others.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rdslog_dl::{Config, HttpLogSource, InstanceId, LogFetcher, SourceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         output_dir: "logs".into(),
//!         source: SourceConfig {
//!             endpoint: Some("https://logs.internal.example".to_string()),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!
//!     let source = Arc::new(HttpLogSource::new(&config.source)?);
//!     let fetcher = LogFetcher::new(config, source)?;
//!
//!     let instance = InstanceId::new("proddb")?;
//!     let batch = fetcher.list_artifacts(&instance).await?;
//!     let mut handle = fetcher.dispatch(instance, batch);
//!     while let Some(outcome) = handle.next().await {
//!         println!("{}: {:?}", outcome.artifact, outcome.status);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Concurrent fetch pipeline
pub mod fetcher;
/// Remote log sources
pub mod source;
/// Core types and events
pub mod types;
/// Writing fetched logs to disk
pub mod writer;

// Re-export commonly used types
pub use config::{Config, FailurePolicy, FetchConfig, SourceConfig};
pub use error::{Error, Result, SourceError, ToExitCode};
pub use fetcher::{CompletionHandle, LogFetcher};
pub use source::{HttpLogSource, LogSource, MemoryLogSource};
pub use types::{ArtifactOutcome, ArtifactRef, ArtifactStatus, BatchReport, Event, InstanceId};
pub use writer::ArtifactWriter;

/// Drain a batch, cancelling it gracefully on a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// On a signal the batch stops launching new downloads and in-flight fetches are
/// cancelled; the returned report still accounts for every log.
pub async fn drain_with_shutdown(handle: CompletionHandle) -> BatchReport {
    let token = handle.cancellation_token();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::warn!("Cancelling log batch");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });

    let report = handle.drain().await;
    watcher.abort();
    report
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}

//! Retrieval task -- fetch one log file, write it, report exactly one outcome.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OwnedSemaphorePermit;

use crate::config::FailurePolicy;
use crate::error::{Error, Result};
use crate::types::{ArtifactOutcome, ArtifactRef, ArtifactStatus, Event};

use super::context::TaskContext;

/// Run a single artifact through `Fetching -> Writing -> Done`.
///
/// The concurrency permit is held until the write has finished. A fetch still in flight
/// when the batch is cancelled resolves to [`ArtifactStatus::Cancelled`]; a write that
/// has started always runs to completion.
pub(super) async fn retrieve_artifact(
    ctx: Arc<TaskContext>,
    artifact: ArtifactRef,
    permit: OwnedSemaphorePermit,
) {
    let started = Instant::now();
    ctx.emit(Event::ArtifactLaunched {
        name: artifact.name.clone(),
    });
    tracing::debug!(instance = %ctx.instance, artifact = %artifact, "Fetching log file");

    let status = tokio::select! {
        biased;
        _ = ctx.cancel_token.cancelled() => ArtifactStatus::Cancelled,
        fetched = fetch(&ctx, &artifact) => match fetched {
            Ok(content) => write(&ctx, &artifact, &content).await,
            Err(e) => {
                tracing::warn!(
                    instance = %ctx.instance,
                    artifact = %artifact,
                    error = %e,
                    "Failed to fetch log file"
                );
                if ctx.failure_policy == FailurePolicy::Abort {
                    tracing::warn!(instance = %ctx.instance, "Cancelling batch after fetch failure");
                    ctx.cancel_token.cancel();
                }
                ArtifactStatus::FetchFailed { error: e.to_string() }
            }
        },
    };
    drop(permit);

    ctx.deliver(ArtifactOutcome {
        artifact,
        status,
        elapsed: started.elapsed(),
    })
    .await;
}

async fn fetch(ctx: &TaskContext, artifact: &ArtifactRef) -> Result<Vec<u8>> {
    let call = ctx.source.fetch_artifact(&ctx.instance, artifact);
    let fetched = match ctx.fetch_timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| Error::Timeout {
                artifact: artifact.name.clone(),
                after: limit,
            })?,
        None => call.await,
    };
    fetched.map_err(|source| Error::Fetch {
        artifact: artifact.name.clone(),
        source,
    })
}

async fn write(ctx: &TaskContext, artifact: &ArtifactRef, content: &[u8]) -> ArtifactStatus {
    match ctx.writer.write(&ctx.instance, artifact, content).await {
        Ok(path) => {
            tracing::debug!(artifact = %artifact, path = %path.display(), "Log file saved");
            ArtifactStatus::Written {
                path,
                bytes: content.len() as u64,
            }
        }
        Err(e) => {
            tracing::warn!(
                instance = %ctx.instance,
                artifact = %artifact,
                error = %e,
                "Failed to write log file"
            );
            ArtifactStatus::WriteFailed {
                error: e.to_string(),
            }
        }
    }
}

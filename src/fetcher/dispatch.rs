//! Batch coordinator -- throttled, bounded launch of retrieval tasks and the final join.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::types::{ArtifactOutcome, ArtifactRef, ArtifactStatus};

use super::context::TaskContext;
use super::task::retrieve_artifact;

/// Launch settings for one batch
pub(super) struct LaunchParams {
    pub(super) launch_delay: Duration,
    pub(super) max_concurrent: usize,
}

/// Spawn the coordination task for a batch and return immediately.
pub(super) fn spawn_coordinator(
    ctx: Arc<TaskContext>,
    batch: Vec<ArtifactRef>,
    params: LaunchParams,
) -> JoinHandle<()> {
    tokio::spawn(run_coordinator(ctx, batch, params))
}

/// Launch one retrieval task per artifact in batch order, then join all of them.
///
/// Every artifact yields exactly one outcome: launched tasks deliver their own, artifacts
/// never launched because of cancellation are reported here, and so are tasks that
/// panicked. Dropping `ctx` at the end releases the last completion sender.
async fn run_coordinator(ctx: Arc<TaskContext>, batch: Vec<ArtifactRef>, params: LaunchParams) {
    let limiter = Arc::new(Semaphore::new(params.max_concurrent));
    let mut tasks = JoinSet::new();
    let mut launched = HashMap::with_capacity(batch.len());
    let mut pending = batch.into_iter();

    while let Some(artifact) = pending.next() {
        let Some(permit) = acquire_launch_slot(&ctx, &limiter, params.launch_delay).await else {
            let skipped: Vec<_> = std::iter::once(artifact).chain(pending.by_ref()).collect();
            tracing::info!(
                instance = %ctx.instance,
                skipped = skipped.len(),
                "Batch cancelled, skipping remaining log files"
            );
            for artifact in skipped {
                ctx.deliver(ArtifactOutcome {
                    artifact,
                    status: ArtifactStatus::Cancelled,
                    elapsed: Duration::ZERO,
                })
                .await;
            }
            break;
        };

        let handle = tasks.spawn(retrieve_artifact(
            Arc::clone(&ctx),
            artifact.clone(),
            permit,
        ));
        launched.insert(handle.id(), artifact);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, ())) => {
                launched.remove(&id);
            }
            Err(e) => {
                let Some(artifact) = launched.remove(&e.id()) else {
                    continue;
                };
                tracing::error!(
                    instance = %ctx.instance,
                    artifact = %artifact,
                    error = %e,
                    "Retrieval task did not finish"
                );
                let status = if e.is_cancelled() {
                    ArtifactStatus::Cancelled
                } else {
                    ArtifactStatus::FetchFailed {
                        error: format!("retrieval task panicked: {e}"),
                    }
                };
                ctx.deliver(ArtifactOutcome {
                    artifact,
                    status,
                    elapsed: Duration::ZERO,
                })
                .await;
            }
        }
    }

    tracing::debug!(instance = %ctx.instance, "All retrieval tasks joined");
}

/// Wait out the launch delay, then take a concurrency permit.
///
/// Returns `None` once the batch is cancelled.
async fn acquire_launch_slot(
    ctx: &TaskContext,
    limiter: &Arc<Semaphore>,
    launch_delay: Duration,
) -> Option<OwnedSemaphorePermit> {
    if !launch_delay.is_zero() {
        tokio::select! {
            biased;
            _ = ctx.cancel_token.cancelled() => return None,
            _ = tokio::time::sleep(launch_delay) => {}
        }
    }

    tokio::select! {
        biased;
        _ = ctx.cancel_token.cancelled() => None,
        permit = Arc::clone(limiter).acquire_owned() => permit.ok(),
    }
}

//! Per-batch task context -- the immutable state every retrieval task shares.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::FailurePolicy;
use crate::source::LogSource;
use crate::types::{ArtifactOutcome, Event, InstanceId};
use crate::writer::ArtifactWriter;

/// Shared context for one batch, handed to each retrieval task at spawn time.
///
/// Holds the only sender of the completion channel; the channel closes once the
/// coordinator and every task have dropped their `Arc`.
pub(super) struct TaskContext {
    pub(super) instance: InstanceId,
    pub(super) source: Arc<dyn LogSource>,
    pub(super) writer: ArtifactWriter,
    pub(super) fetch_timeout: Option<Duration>,
    pub(super) failure_policy: FailurePolicy,
    pub(super) cancel_token: CancellationToken,
    pub(super) event_tx: broadcast::Sender<Event>,
    pub(super) outcome_tx: mpsc::Sender<ArtifactOutcome>,
}

impl TaskContext {
    /// Broadcast an event; having no subscribers is fine.
    pub(super) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Announce an outcome and hand it to the completion handle.
    pub(super) async fn deliver(&self, outcome: ArtifactOutcome) {
        self.emit(Event::for_outcome(&outcome));
        if self.outcome_tx.send(outcome).await.is_err() {
            tracing::debug!(
                instance = %self.instance,
                "Completion handle dropped, outcome discarded"
            );
        }
    }
}

//! Completion handle -- the caller's view of a dispatched batch.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::types::{ArtifactOutcome, BatchReport, Event, InstanceId};

/// Handle to a batch in flight.
///
/// Yields one [`ArtifactOutcome`] per artifact, in completion order, and closes once
/// every retrieval task has finished. Dropping the handle without draining it leaves the
/// batch running to completion in the background; call [`cancel`](Self::cancel) first to
/// stop it.
pub struct CompletionHandle {
    outcomes: mpsc::Receiver<ArtifactOutcome>,
    report: BatchReport,
    cancel_token: CancellationToken,
    event_tx: broadcast::Sender<Event>,
    coordinator: JoinHandle<()>,
}

impl CompletionHandle {
    pub(super) fn new(
        outcomes: mpsc::Receiver<ArtifactOutcome>,
        report: BatchReport,
        cancel_token: CancellationToken,
        event_tx: broadcast::Sender<Event>,
        coordinator: JoinHandle<()>,
    ) -> Self {
        Self {
            outcomes,
            report,
            cancel_token,
            event_tx,
            coordinator,
        }
    }

    /// Instance the batch belongs to
    pub fn instance(&self) -> &InstanceId {
        &self.report.instance
    }

    /// Number of artifacts in the batch
    pub fn total(&self) -> usize {
        self.report.total
    }

    /// Outcomes received so far through [`next`](Self::next)
    pub fn completed(&self) -> usize {
        self.report.completed()
    }

    /// Stop launching new retrievals and cancel fetches in flight.
    ///
    /// The handle still yields one outcome per artifact; unfinished ones are
    /// [`Cancelled`](crate::types::ArtifactStatus::Cancelled).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Token that cancels this batch
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Wait for the next outcome; `None` once the batch is fully processed.
    pub async fn next(&mut self) -> Option<ArtifactOutcome> {
        let outcome = self.outcomes.recv().await?;
        self.report.record(outcome.clone());
        Some(outcome)
    }

    /// Receive every remaining outcome and return the aggregate report.
    ///
    /// On return no retrieval task of this batch is still running.
    pub async fn drain(mut self) -> BatchReport {
        while self.next().await.is_some() {}

        if let Err(e) = (&mut self.coordinator).await {
            tracing::error!(
                instance = %self.report.instance,
                error = %e,
                "Batch coordinator did not finish cleanly"
            );
        }

        let mut report = self.report;
        report.finished_at = chrono::Utc::now();

        tracing::info!(
            instance = %report.instance,
            total = report.total,
            written = report.written,
            failed = report.failures.len(),
            cancelled = report.cancelled.len(),
            bytes = report.bytes_written,
            "Log batch complete"
        );
        self.event_tx
            .send(Event::BatchComplete {
                instance: report.instance.clone(),
                written: report.written,
                failed: report.failures.len(),
                cancelled: report.cancelled.len(),
            })
            .ok();

        report
    }

    /// Consume the handle as a [`Stream`](tokio_stream::Stream) of the remaining outcomes.
    pub fn into_stream(self) -> ReceiverStream<ArtifactOutcome> {
        ReceiverStream::new(self.outcomes)
    }
}

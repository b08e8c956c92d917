//! Presence event ingestor.
//!
//! Webhook payloads are validated and stamped on receipt by
//! [`Ingestor::submit`], buffered on the [`IngestQueue`], and applied to the
//! online set by the long-running [`Ingestor::run`] loop. Every failure here
//! is absorbed: the event is dropped, logged and counted, and reconciliation
//! repairs whatever drift results.

use std::sync::Arc;
use std::time::Duration;

use herald_core::clock::Clock;
use herald_core::presence::{PresenceChange, PresenceEvent, WebhookPayload};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityTracker;
use crate::metrics::Metrics;
use crate::queue::{IngestQueue, IngestReceiver};
use crate::reconcile::ReconcileHandle;
use crate::store::{OnlineSetStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid presence event: {0}")]
    InvalidEvent(String),

    #[error("Online-set store unavailable")]
    StoreUnavailable,
}

pub struct Ingestor {
    store: Arc<dyn OnlineSetStore>,
    queue: IngestQueue,
    reconcile: ReconcileHandle,
    activity: Arc<ActivityTracker>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn OnlineSetStore>,
        queue: IngestQueue,
        reconcile: ReconcileHandle,
        activity: Arc<ActivityTracker>,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            reconcile,
            activity,
            metrics,
            clock,
            store_timeout,
        }
    }

    /// Validate a raw webhook payload and enqueue it for application.
    ///
    /// `observed_at` is taken here, at receipt, not when the event is
    /// eventually dequeued.
    pub fn submit(&self, payload: WebhookPayload) -> Result<(), IngestError> {
        let event = PresenceEvent::from_webhook(payload, self.clock.now()).map_err(|e| {
            self.metrics.webhook_dropped.inc();
            tracing::warn!(error = %e, "Rejected presence webhook");
            IngestError::InvalidEvent(e.to_string())
        })?;

        if !self.queue.push(event) {
            self.metrics.webhook_dropped.inc();
            tracing::warn!("Ingest loop not running, presence event dropped");
        }
        Ok(())
    }

    /// Apply one event to the online set.
    ///
    /// Store calls are bounded by the configured timeout; on timeout or store
    /// error the event is dropped with [`IngestError::StoreUnavailable`].
    pub async fn ingest(&self, event: PresenceEvent) -> Result<(), IngestError> {
        let result = self.apply(&event).await;
        match &result {
            Ok(()) => self.metrics.webhook_ingested.inc(),
            Err(e) => {
                self.metrics.webhook_dropped.inc();
                tracing::warn!(
                    channel = %event.channel,
                    kind = ?event.kind(),
                    error = %e,
                    "Presence event dropped",
                );
            }
        }
        result
    }

    /// Drain the ingest queue until `cancel` fires or the queue closes.
    pub async fn run(self: Arc<Self>, mut receiver: IngestReceiver, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Presence ingestor cancelled");
                    break;
                }
                received = receiver.recv() => match received {
                    // Errors are counted and logged inside `ingest`.
                    Ok(event) => { let _ = self.ingest(event).await; }
                    Err(RecvError::Lagged(n)) => {
                        self.metrics.webhook_dropped.add(n);
                        tracing::warn!(
                            skipped = n,
                            "Ingest queue overflowed, oldest presence events dropped"
                        );
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Ingest queue closed, ingestor shutting down");
                        break;
                    }
                },
            }
        }
    }

    // ---- private helpers ----

    async fn apply(&self, event: &PresenceEvent) -> Result<(), IngestError> {
        validate(event)?;
        self.activity.touch(&event.channel);

        // A truncated delta is still applied; reconciliation then replaces it
        // with the full picture.
        if event.overflowed {
            self.reconcile.request(&event.channel);
        }

        let channel = event.channel.as_str();
        match &event.change {
            PresenceChange::Join(recipient) => {
                self.bounded(self.store.upsert(channel, recipient, event.observed_at))
                    .await
            }
            PresenceChange::Leave(recipient) | PresenceChange::Timeout(recipient) => {
                self.bounded(self.store.remove(channel, recipient)).await
            }
            PresenceChange::Interval(delta) => {
                let joined = delta.net_joined();
                let departed: Vec<String> = delta.departed().into_iter().collect();
                self.bounded(self.store.bulk_upsert(channel, &joined, event.observed_at))
                    .await?;
                self.bounded(self.store.bulk_remove(channel, &departed)).await
            }
        }
    }

    async fn bounded<F>(&self, call: F) -> Result<(), IngestError>
    where
        F: std::future::Future<Output = Result<(), StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(IngestError::StoreUnavailable),
        }
    }
}

fn validate(event: &PresenceEvent) -> Result<(), IngestError> {
    if event.channel.trim().is_empty() {
        return Err(IngestError::InvalidEvent("missing channel".into()));
    }
    let blank_recipient = match &event.change {
        PresenceChange::Join(r) | PresenceChange::Leave(r) | PresenceChange::Timeout(r) => {
            r.trim().is_empty()
        }
        PresenceChange::Interval(delta) => delta
            .joined
            .iter()
            .chain(&delta.left)
            .chain(&delta.timed_out)
            .any(|r| r.trim().is_empty()),
    };
    if blank_recipient {
        return Err(IngestError::InvalidEvent("blank recipient id".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Buffered decision log.
//!
//! The publish gate hands every [`GateDecision`] to [`DecisionLog::record`],
//! which only enqueues. A [`DecisionFlusher`] background task drains the
//! buffer in batches into a [`DecisionSink`]. Neither a full buffer nor a
//! failing sink ever pushes back on publishing; decisions are dropped and
//! counted instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_core::decision::{DecisionOutcome, GateDecision};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
#[error("Decision sink unavailable: {0}")]
pub struct SinkError(pub String);

/// Destination for flushed decision batches.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn flush(&self, batch: &[GateDecision]) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// DecisionLog
// ---------------------------------------------------------------------------

/// Producer handle used on the publish hot path. Cheap to clone.
#[derive(Clone)]
pub struct DecisionLog {
    tx: mpsc::Sender<GateDecision>,
    metrics: Arc<Metrics>,
}

impl DecisionLog {
    /// Create a log with a buffer of `capacity` decisions and its receiver.
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> (Self, mpsc::Receiver<GateDecision>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, metrics }, rx)
    }

    /// Enqueue a decision without waiting.
    pub fn record(&self, decision: GateDecision) {
        match self.tx.try_send(decision) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.decisions_dropped.inc();
                tracing::trace!("Decision buffer full, decision dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.decisions_dropped.inc();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DecisionFlusher
// ---------------------------------------------------------------------------

pub struct DecisionFlusher {
    rx: mpsc::Receiver<GateDecision>,
    sink: Arc<dyn DecisionSink>,
    metrics: Arc<Metrics>,
    batch_size: usize,
    flush_every: Duration,
}

impl DecisionFlusher {
    pub fn new(
        rx: mpsc::Receiver<GateDecision>,
        sink: Arc<dyn DecisionSink>,
        metrics: Arc<Metrics>,
        batch_size: usize,
        flush_every: Duration,
    ) -> Self {
        Self {
            rx,
            sink,
            metrics,
            batch_size: batch_size.max(1),
            flush_every,
        }
    }

    /// Flush on a fixed interval or whenever a full batch accumulates.
    ///
    /// On cancellation, whatever is already buffered is flushed once more
    /// before returning.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_every);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    while let Ok(decision) = self.rx.try_recv() {
                        batch.push(decision);
                    }
                    self.flush(&mut batch).await;
                    tracing::info!("Decision flusher cancelled");
                    break;
                }
                received = self.rx.recv() => match received {
                    Some(decision) => {
                        batch.push(decision);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => {
                        self.flush(&mut batch).await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush(&mut batch).await,
            }
        }
    }

    async fn flush(&self, batch: &mut Vec<GateDecision>) {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.sink.flush(batch).await {
            self.metrics.decisions_dropped.add(batch.len() as u64);
            tracing::warn!(dropped = batch.len(), error = %e, "Failed to flush gate decisions");
        }
        batch.clear();
    }
}

// ---------------------------------------------------------------------------
// MetricsSink
// ---------------------------------------------------------------------------

/// Default sink: bumps the publish counters and emits one structured event
/// per decision on the `herald::decisions` target.
pub struct MetricsSink {
    metrics: Arc<Metrics>,
}

impl MetricsSink {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl DecisionSink for MetricsSink {
    async fn flush(&self, batch: &[GateDecision]) -> Result<(), SinkError> {
        for decision in batch {
            match decision.outcome {
                DecisionOutcome::Sent => self.metrics.publish_sent.inc(),
                DecisionOutcome::Suppressed => self.metrics.publish_suppressed.inc(),
                DecisionOutcome::SentAfterEscalation => {
                    self.metrics.publish_sent_after_escalation.inc()
                }
            }
            if decision.is_degraded() {
                self.metrics.publish_fail_open.inc();
            }

            tracing::info!(
                target: "herald::decisions",
                channel = %decision.channel,
                recipient = %decision.recipient_id,
                message_id = %decision.message_id,
                outcome = ?decision.outcome,
                source = ?decision.source,
                latency_us = decision.latency_micros,
                "gate decision",
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use herald_core::decision::DecisionSource;
    use uuid::Uuid;

    use super::*;

    fn decision(outcome: DecisionOutcome, source: DecisionSource) -> GateDecision {
        GateDecision {
            channel: "c".into(),
            recipient_id: "r".into(),
            message_id: Uuid::nil(),
            outcome,
            source,
            latency_micros: 10,
            decided_at: Utc::now(),
        }
    }

    struct FailingSink;

    #[async_trait]
    impl DecisionSink for FailingSink {
        async fn flush(&self, _: &[GateDecision]) -> Result<(), SinkError> {
            Err(SinkError("collector offline".into()))
        }
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let metrics = Arc::new(Metrics::default());
        let (log, _rx) = DecisionLog::new(2, metrics.clone());
        for _ in 0..5 {
            log.record(decision(DecisionOutcome::Sent, DecisionSource::CacheHit));
        }
        assert_eq!(metrics.decisions_dropped.get(), 3);
    }

    #[tokio::test]
    async fn flushed_decisions_update_counters() {
        let metrics = Arc::new(Metrics::default());
        let (log, rx) = DecisionLog::new(16, metrics.clone());
        let flusher = DecisionFlusher::new(
            rx,
            Arc::new(MetricsSink::new(metrics.clone())),
            metrics.clone(),
            2,
            Duration::from_secs(60),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(flusher.run(cancel.clone()));

        log.record(decision(DecisionOutcome::Sent, DecisionSource::CacheHit));
        log.record(decision(DecisionOutcome::Suppressed, DecisionSource::CacheMissGraceful));
        log.record(decision(DecisionOutcome::Sent, DecisionSource::FailOpen));
        log.record(decision(
            DecisionOutcome::SentAfterEscalation,
            DecisionSource::GroundTruthVerified,
        ));

        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(metrics.publish_sent.get(), 2);
        assert_eq!(metrics.publish_suppressed.get(), 1);
        assert_eq!(metrics.publish_sent_after_escalation.get(), 1);
        assert_eq!(metrics.publish_fail_open.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_flushes_partial_batches() {
        let metrics = Arc::new(Metrics::default());
        let (log, rx) = DecisionLog::new(16, metrics.clone());
        let flusher = DecisionFlusher::new(
            rx,
            Arc::new(MetricsSink::new(metrics.clone())),
            metrics.clone(),
            100,
            Duration::from_millis(500),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(flusher.run(cancel.clone()));

        log.record(decision(DecisionOutcome::Suppressed, DecisionSource::CacheMissGraceful));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(metrics.publish_suppressed.get(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failing_sink_counts_dropped_decisions() {
        let metrics = Arc::new(Metrics::default());
        let (log, rx) = DecisionLog::new(16, metrics.clone());
        let flusher =
            DecisionFlusher::new(rx, Arc::new(FailingSink), metrics.clone(), 10, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        log.record(decision(DecisionOutcome::Sent, DecisionSource::CacheHit));
        log.record(decision(DecisionOutcome::Sent, DecisionSource::CacheHit));
        cancel.cancel();
        flusher.run(cancel).await;

        assert_eq!(metrics.decisions_dropped.get(), 2);
        assert_eq!(metrics.publish_sent.get(), 0);
    }
}

//! Wires the engine's components together and owns their background tasks.

use std::sync::Arc;
use std::time::Duration;

use herald_core::clock::Clock;
use herald_core::config::HeraldConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityTracker;
use crate::decision_log::{DecisionFlusher, DecisionLog, DecisionSink, MetricsSink};
use crate::gate::PublishGate;
use crate::ingest::Ingestor;
use crate::metrics::Metrics;
use crate::queue::IngestQueue;
use crate::reconcile::{ReconcileHandle, ReconcileSettings, ReconciliationEngine};
use crate::store::{run_sweeper, OnlineSetStore};
use crate::upstream::{MessageTransport, PresenceOracle};

/// Maximum time to wait for each background task during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// On-demand reconciliation requests waiting for the engine loop.
const RECONCILE_REQUEST_CAPACITY: usize = 1024;

/// A running Herald instance.
///
/// Holds the shared components the HTTP layer calls into, plus the handles
/// of the ingest loop, reconciliation loop, decision flusher and store
/// sweeper.
pub struct Herald {
    pub store: Arc<dyn OnlineSetStore>,
    pub ingestor: Arc<Ingestor>,
    pub engine: Arc<ReconciliationEngine>,
    pub gate: Arc<PublishGate>,
    pub metrics: Arc<Metrics>,
    pub reconcile: ReconcileHandle,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Herald {
    /// Build every component and spawn the background loops.
    ///
    /// Decisions are flushed into a [`MetricsSink`].
    pub fn start(
        config: &HeraldConfig,
        store: Arc<dyn OnlineSetStore>,
        oracle: Arc<dyn PresenceOracle>,
        transport: Arc<dyn MessageTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(Metrics::default());
        let sink = Arc::new(MetricsSink::new(metrics.clone()));
        Self::start_with_sink(config, store, oracle, transport, clock, metrics, sink)
    }

    /// Like [`start`](Self::start), but flushing decisions into `sink`.
    pub fn start_with_sink(
        config: &HeraldConfig,
        store: Arc<dyn OnlineSetStore>,
        oracle: Arc<dyn PresenceOracle>,
        transport: Arc<dyn MessageTransport>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        sink: Arc<dyn DecisionSink>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let activity = Arc::new(ActivityTracker::new());

        let (request_tx, request_rx) = mpsc::channel(RECONCILE_REQUEST_CAPACITY);
        let reconcile = ReconcileHandle::new(request_tx);
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            oracle.clone(),
            clock.clone(),
            activity.clone(),
            metrics.clone(),
            ReconcileSettings::from(config),
        ));

        let (queue, receiver) = IngestQueue::new(config.ingest_queue_capacity);
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            queue,
            reconcile.clone(),
            activity.clone(),
            metrics.clone(),
            clock.clone(),
            config.ingest_store_timeout(),
        ));

        let (log, decisions) = DecisionLog::new(config.decision_buffer_capacity, metrics.clone());
        let flusher = DecisionFlusher::new(
            decisions,
            sink,
            metrics.clone(),
            config.decision_batch_size,
            config.decision_flush_interval(),
        );
        let gate = Arc::new(PublishGate::new(
            store.clone(),
            oracle,
            transport,
            log,
            activity,
            metrics.clone(),
            clock,
            config,
        ));

        let tasks = vec![
            (
                "ingestor",
                tokio::spawn(ingestor.clone().run(receiver, cancel.clone())),
            ),
            (
                "reconciliation",
                tokio::spawn(engine.clone().run(request_rx, cancel.clone())),
            ),
            ("decision-flusher", tokio::spawn(flusher.run(cancel.clone()))),
            (
                "store-sweeper",
                tokio::spawn(run_sweeper(
                    store.clone(),
                    config.store_sweep_interval(),
                    cancel.clone(),
                )),
            ),
        ];

        tracing::info!(
            online_ttl_secs = config.online_ttl_secs,
            reconciliation_interval_secs = config.reconciliation_interval_secs,
            max_concurrent_reconciliations = config.max_concurrent_reconciliations,
            "Herald engine started",
        );

        Self {
            store,
            ingestor,
            engine,
            gate,
            metrics,
            reconcile,
            cancel,
            tasks,
        }
    }

    /// Stop every background loop, flushing buffered decisions first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "Background task panicked"),
                Err(_) => tracing::warn!(task = name, "Background task did not stop in time"),
            }
        }
        tracing::info!("Herald engine stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

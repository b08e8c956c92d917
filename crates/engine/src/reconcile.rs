//! Reconciliation engine: replaces cached membership with ground truth.
//!
//! The online set drifts whenever presence events are lost, delayed or never
//! sent (crashed clients, network partitions). [`ReconciliationEngine`]
//! corrects it by querying the upstream "here now" endpoint and replacing the
//! channel's membership wholesale.
//!
//! Cost is bounded three ways: concurrent calls for one channel share a
//! single in-flight query, a channel is not re-queried within the configured
//! minimum spacing, and a semaphore caps outstanding queries overall.
//! Failures leave the store untouched and are retried on an explicit
//! schedule (exponential backoff with full jitter) driven by
//! [`ReconciliationEngine::run`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use herald_core::backoff::{retry_delay, BackoffConfig};
use herald_core::clock::Clock;
use herald_core::config::HeraldConfig;
use herald_core::types::Timestamp;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityTracker;
use crate::metrics::Metrics;
use crate::store::OnlineSetStore;
use crate::upstream::PresenceOracle;

/// How often the run loop checks for due retries.
const RETRY_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconcileError {
    #[error("Ground-truth query failed: {0}")]
    UpstreamQueryFailed(String),

    #[error("Ground-truth query timed out")]
    Timeout,

    /// The channel was reconciled too recently.
    #[error("Reconciliation throttled, retry in {retry_in:?}")]
    Throttled { retry_in: Duration },

    #[error("Online-set store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Outcome of one successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReconciliationReport {
    pub channel: String,
    /// Recipients written as online.
    pub occupants: usize,
    /// Present upstream but not claimed by the store beforehand.
    pub added: usize,
    /// Claimed by the store but absent upstream.
    pub removed: usize,
    pub completed_at: Timestamp,
}

type SharedReconcile = Shared<BoxFuture<'static, Result<ReconciliationReport, ReconcileError>>>;

#[derive(Debug, Clone, Copy)]
struct RetryState {
    failures: u32,
    due: Instant,
}

/// Engine tunables, extracted from [`HeraldConfig`].
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub interval: Duration,
    pub min_spacing: Duration,
    pub max_concurrent: usize,
    pub activity_window: Duration,
    pub query_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl From<&HeraldConfig> for ReconcileSettings {
    fn from(config: &HeraldConfig) -> Self {
        Self {
            interval: config.reconciliation_interval(),
            min_spacing: config.reconciliation_min_spacing(),
            max_concurrent: config.max_concurrent_reconciliations.max(1),
            activity_window: config.activity_window(),
            query_timeout: config.ground_truth_timeout(),
            backoff: config.retry_backoff(),
        }
    }
}

// ---------------------------------------------------------------------------
// ReconcileHandle
// ---------------------------------------------------------------------------

/// Fire-and-forget on-demand reconciliation requests.
#[derive(Clone)]
pub struct ReconcileHandle {
    tx: mpsc::Sender<String>,
}

impl ReconcileHandle {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Ask the engine to reconcile `channel` soon. Never waits.
    pub fn request(&self, channel: &str) {
        if let Err(e) = self.tx.try_send(channel.to_string()) {
            tracing::warn!(channel, error = %e, "Dropped on-demand reconciliation request");
        }
    }
}

// ---------------------------------------------------------------------------
// ReconciliationEngine
// ---------------------------------------------------------------------------

pub struct ReconciliationEngine {
    store: Arc<dyn OnlineSetStore>,
    oracle: Arc<dyn PresenceOracle>,
    clock: Arc<dyn Clock>,
    activity: Arc<ActivityTracker>,
    metrics: Arc<Metrics>,
    settings: ReconcileSettings,
    permits: Semaphore,
    in_flight: DashMap<String, SharedReconcile>,
    last_query: DashMap<String, Instant>,
    retries: DashMap<String, RetryState>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn OnlineSetStore>,
        oracle: Arc<dyn PresenceOracle>,
        clock: Arc<dyn Clock>,
        activity: Arc<ActivityTracker>,
        metrics: Arc<Metrics>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            permits: Semaphore::new(settings.max_concurrent.max(1)),
            store,
            oracle,
            clock,
            activity,
            metrics,
            settings,
            in_flight: DashMap::new(),
            last_query: DashMap::new(),
            retries: DashMap::new(),
        }
    }

    /// Replace `channel`'s cached membership with upstream ground truth.
    ///
    /// Joins an in-flight query for the same channel if one exists; every
    /// joined caller receives that query's result. Otherwise returns
    /// [`ReconcileError::Throttled`] if the channel was queried within the
    /// minimum spacing.
    pub async fn reconcile(
        self: &Arc<Self>,
        channel: &str,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let pending = match self.in_flight.entry(channel.to_string()) {
            Entry::Occupied(running) => running.get().clone(),
            Entry::Vacant(slot) => {
                if let Some(retry_in) = self.spacing_remaining(channel) {
                    return Err(ReconcileError::Throttled { retry_in });
                }
                let query = self.spawn_query(channel.to_string());
                slot.insert(query.clone());
                query
            }
        };
        pending.await
    }

    /// Whether a ground-truth query for `channel` is currently running.
    pub fn is_in_flight(&self, channel: &str) -> bool {
        self.in_flight.contains_key(channel)
    }

    /// Channels waiting for a backoff retry or a throttled request.
    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// Drive scheduled sweeps, on-demand requests and retries until `cancel`
    /// fires.
    pub async fn run(self: Arc<Self>, mut requests: mpsc::Receiver<String>, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(self.settings.interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut retry_poll = tokio::time::interval(RETRY_POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciliation engine cancelled");
                    break;
                }
                Some(channel) = requests.recv() => {
                    tracing::debug!(channel = %channel, "On-demand reconciliation requested");
                    self.spawn_reconcile(channel);
                }
                _ = sweep.tick() => self.sweep(),
                _ = retry_poll.tick() => self.retry_due(),
            }
        }
    }

    // ---- private helpers ----

    fn spacing_remaining(&self, channel: &str) -> Option<Duration> {
        let last = self.last_query.get(channel)?;
        let elapsed = last.elapsed();
        (elapsed < self.settings.min_spacing).then(|| self.settings.min_spacing - elapsed)
    }

    /// Start the query as its own task so it progresses even if every
    /// caller stops waiting.
    fn spawn_query(self: &Arc<Self>, channel: String) -> SharedReconcile {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = this.query_and_replace(&channel).await;
            this.last_query.insert(channel.clone(), Instant::now());
            this.in_flight.remove(&channel);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(ReconcileError::UpstreamQueryFailed(format!(
                    "reconciliation task aborted: {e}"
                )))
            })
        }
        .boxed()
        .shared()
    }

    async fn query_and_replace(&self, channel: &str) -> Result<ReconciliationReport, ReconcileError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ReconcileError::UpstreamQueryFailed("engine shut down".into()))?;

        self.metrics.reconciliation_triggered.inc();

        let result = self.replace_from_ground_truth(channel).await;
        match &result {
            Ok(report) => {
                self.retries.remove(channel);
                tracing::debug!(
                    channel,
                    occupants = report.occupants,
                    added = report.added,
                    removed = report.removed,
                    "Channel reconciled",
                );
            }
            Err(e) => self.schedule_retry(channel, e),
        }
        result
    }

    async fn replace_from_ground_truth(
        &self,
        channel: &str,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let occupants = match tokio::time::timeout(
            self.settings.query_timeout,
            self.oracle.here_now(channel),
        )
        .await
        {
            Err(_) => return Err(ReconcileError::Timeout),
            Ok(Err(e)) => return Err(ReconcileError::UpstreamQueryFailed(e.to_string())),
            Ok(Ok(occupants)) => occupants,
        };

        // Only used for the report; a failed read here must not block repair.
        let previous: HashSet<String> = self.store.members(channel).await.unwrap_or_default();

        let recipients: Vec<String> = occupants.iter().cloned().collect();
        let completed_at = self.clock.now();
        self.store
            .replace_channel(channel, &recipients, completed_at)
            .await
            .map_err(|e| ReconcileError::StoreUnavailable(e.to_string()))?;

        Ok(ReconciliationReport {
            channel: channel.to_string(),
            occupants: occupants.len(),
            added: occupants.difference(&previous).count(),
            removed: previous.difference(&occupants).count(),
            completed_at,
        })
    }

    fn schedule_retry(&self, channel: &str, error: &ReconcileError) {
        self.metrics.reconciliation_failed.inc();

        let mut state = self.retries.entry(channel.to_string()).or_insert(RetryState {
            failures: 0,
            due: Instant::now(),
        });
        state.failures = state.failures.saturating_add(1);
        let delay = retry_delay(state.failures, &self.settings.backoff);
        state.due = Instant::now() + delay;

        tracing::warn!(
            channel,
            failures = state.failures,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "Reconciliation failed, keeping cached state",
        );
    }

    fn spawn_reconcile(self: &Arc<Self>, channel: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.reconcile(&channel).await {
                Ok(_) => {}
                Err(ReconcileError::Throttled { retry_in }) => {
                    // Deferred, not dropped: the retry schedule picks the
                    // channel up once spacing lapses.
                    let due = Instant::now() + retry_in;
                    this.retries
                        .entry(channel.clone())
                        .and_modify(|state| state.due = due)
                        .or_insert(RetryState { failures: 0, due });
                    tracing::debug!(
                        channel = %channel,
                        retry_in_ms = retry_in.as_millis() as u64,
                        "Reconciliation throttled, deferred",
                    );
                }
                // Already logged and scheduled for retry.
                Err(_) => {}
            }
        });
    }

    fn sweep(self: &Arc<Self>) {
        // Spacing marks older than the spacing itself no longer throttle.
        let min_spacing = self.settings.min_spacing;
        self.last_query.retain(|_, at| at.elapsed() < min_spacing);

        let channels = self.activity.active_within(self.settings.activity_window);
        if channels.is_empty() {
            return;
        }
        tracing::debug!(count = channels.len(), "Scheduled reconciliation sweep");
        for channel in channels {
            if self.is_in_flight(&channel) || self.spacing_remaining(&channel).is_some() {
                continue;
            }
            self.spawn_reconcile(channel);
        }
    }

    fn retry_due(self: &Arc<Self>) {
        let now = Instant::now();
        let window = self.settings.activity_window;

        // Idle channels are left to TTL expiry.
        self.retries
            .retain(|channel, _| self.activity.is_active(channel, window));

        let due: Vec<String> = self
            .retries
            .iter()
            .filter(|r| r.due <= now)
            .map(|r| r.key().clone())
            .collect();

        for channel in due {
            if self.is_in_flight(&channel) {
                continue;
            }
            self.spawn_reconcile(channel);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! The publish gate.
//!
//! Decides, per outbound message, whether to transmit based on the online
//! set's claim about the recipient:
//!
//! | store says       | priority   | outcome                                   |
//! |------------------|------------|-------------------------------------------|
//! | online           | any        | `Sent` / `CacheHit`                       |
//! | not online       | < Critical | `Suppressed` / `CacheMissGraceful`        |
//! | not online       | Critical   | ask upstream; `SentAfterEscalation` or    |
//! |                  |            | `Suppressed`, both `GroundTruthVerified`  |
//! | unreachable/slow | any        | `Sent` / `FailOpen`                       |
//!
//! Unknown state publishes; only known-offline state suppresses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use herald_core::clock::Clock;
use herald_core::config::HeraldConfig;
use herald_core::decision::{
    DecisionOutcome, DecisionSource, GateDecision, OutboundMessage, Priority,
};
use herald_core::types::Timetoken;
use serde::Serialize;

use crate::activity::ActivityTracker;
use crate::decision_log::DecisionLog;
use crate::metrics::Metrics;
use crate::store::OnlineSetStore;
use crate::upstream::{MessageTransport, PresenceOracle, TransportError};

/// A gate decision plus the transport's token when the message went out.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub decision: GateDecision,
    pub timetoken: Option<Timetoken>,
}

pub struct PublishGate {
    store: Arc<dyn OnlineSetStore>,
    oracle: Arc<dyn PresenceOracle>,
    transport: Arc<dyn MessageTransport>,
    log: DecisionLog,
    activity: Arc<ActivityTracker>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    store_read_timeout: Duration,
    escalation_timeout: Duration,
}

impl PublishGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn OnlineSetStore>,
        oracle: Arc<dyn PresenceOracle>,
        transport: Arc<dyn MessageTransport>,
        log: DecisionLog,
        activity: Arc<ActivityTracker>,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        config: &HeraldConfig,
    ) -> Self {
        Self {
            store,
            oracle,
            transport,
            log,
            activity,
            metrics,
            clock,
            store_read_timeout: config.store_read_timeout(),
            escalation_timeout: config.critical_escalation_timeout(),
        }
    }

    /// Decide whether to publish `message` to `recipient` on `channel`, and
    /// publish it if so.
    ///
    /// The decision is recorded before the transport is called, so a
    /// transport failure still leaves an audit trail. The gate does not
    /// retry failed sends.
    pub async fn decide(
        &self,
        channel: &str,
        recipient: &str,
        message: &OutboundMessage,
        priority: Priority,
    ) -> Result<PublishOutcome, TransportError> {
        let started = Instant::now();
        self.activity.touch(channel);

        let (outcome, source) = self.evaluate(channel, recipient, priority).await;

        let decision = GateDecision {
            channel: channel.to_string(),
            recipient_id: recipient.to_string(),
            message_id: message.id,
            outcome,
            source,
            latency_micros: started.elapsed().as_micros() as u64,
            decided_at: self.clock.now(),
        };
        self.log.record(decision.clone());

        if !outcome.transmits() {
            return Ok(PublishOutcome {
                decision,
                timetoken: None,
            });
        }

        match self.transport.send(channel, recipient, message).await {
            Ok(timetoken) => Ok(PublishOutcome {
                decision,
                timetoken: Some(timetoken),
            }),
            Err(e) => {
                tracing::warn!(
                    channel,
                    recipient,
                    message_id = %message.id,
                    error = %e,
                    "Publish failed after gate allowed it",
                );
                Err(e)
            }
        }
    }

    async fn evaluate(
        &self,
        channel: &str,
        recipient: &str,
        priority: Priority,
    ) -> (DecisionOutcome, DecisionSource) {
        let lookup = tokio::time::timeout(
            self.store_read_timeout,
            self.store.is_online(channel, recipient),
        )
        .await;

        match lookup {
            Ok(Ok(true)) => {
                self.metrics.record_lookup(true);
                (DecisionOutcome::Sent, DecisionSource::CacheHit)
            }
            Ok(Ok(false)) => {
                self.metrics.record_lookup(false);
                if priority == Priority::Critical {
                    self.escalate(channel, recipient).await
                } else {
                    (DecisionOutcome::Suppressed, DecisionSource::CacheMissGraceful)
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(channel, recipient, error = %e, "Online set unavailable, failing open");
                (DecisionOutcome::Sent, DecisionSource::FailOpen)
            }
            Err(_) => {
                tracing::warn!(channel, recipient, "Online-set lookup timed out, failing open");
                (DecisionOutcome::Sent, DecisionSource::FailOpen)
            }
        }
    }

    /// Ask upstream about one recipient, repairing the store if it was wrong.
    async fn escalate(&self, channel: &str, recipient: &str) -> (DecisionOutcome, DecisionSource) {
        let answer = tokio::time::timeout(
            self.escalation_timeout,
            self.oracle.is_present(channel, recipient),
        )
        .await;

        match answer {
            Ok(Ok(true)) => {
                let repair = tokio::time::timeout(
                    self.store_read_timeout,
                    self.store.upsert(channel, recipient, self.clock.now()),
                )
                .await;
                if !matches!(repair, Ok(Ok(()))) {
                    tracing::warn!(channel, recipient, "Could not repair online set after escalation");
                }
                (
                    DecisionOutcome::SentAfterEscalation,
                    DecisionSource::GroundTruthVerified,
                )
            }
            Ok(Ok(false)) => (DecisionOutcome::Suppressed, DecisionSource::GroundTruthVerified),
            Ok(Err(e)) => {
                tracing::warn!(channel, recipient, error = %e, "Escalation query failed, failing open");
                (DecisionOutcome::Sent, DecisionSource::FailOpen)
            }
            Err(_) => {
                tracing::warn!(channel, recipient, "Escalation query timed out, failing open");
                (DecisionOutcome::Sent, DecisionSource::FailOpen)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use herald_core::clock::SystemClock;
    use tokio::sync::mpsc;

    use super::*;
    use crate::store::MemoryOnlineSet;
    use crate::test_support::{HangingStore, RecordingTransport, ScriptedOracle, UnavailableStore};

    struct Fixture {
        gate: PublishGate,
        oracle: Arc<ScriptedOracle>,
        transport: Arc<RecordingTransport>,
        decisions: mpsc::Receiver<GateDecision>,
    }

    fn fixture(store: Arc<dyn OnlineSetStore>) -> Fixture {
        let oracle = Arc::new(ScriptedOracle::new());
        let transport = Arc::new(RecordingTransport::new());
        let metrics = Arc::new(Metrics::default());
        let (log, decisions) = DecisionLog::new(64, metrics.clone());
        let gate = PublishGate::new(
            store,
            oracle.clone(),
            transport.clone(),
            log,
            Arc::new(ActivityTracker::new()),
            metrics,
            Arc::new(SystemClock),
            &HeraldConfig::default(),
        );
        Fixture {
            gate,
            oracle,
            transport,
            decisions,
        }
    }

    fn memory_store() -> Arc<MemoryOnlineSet> {
        Arc::new(MemoryOnlineSet::new(
            chrono::Duration::seconds(300),
            Arc::new(SystemClock),
        ))
    }

    fn msg() -> OutboundMessage {
        OutboundMessage::new(serde_json::json!({"text": "your turn"}))
    }

    #[tokio::test]
    async fn online_recipient_is_sent_from_cache() {
        let store = memory_store();
        store.upsert("game.u42", "u42", Utc::now()).await.unwrap();
        let mut f = fixture(store);

        let out = f.gate.decide("game.u42", "u42", &msg(), Priority::Normal).await.unwrap();

        assert_eq!(out.decision.outcome, DecisionOutcome::Sent);
        assert_eq!(out.decision.source, DecisionSource::CacheHit);
        assert!(out.timetoken.is_some());
        assert!(f.transport.sent_to("game.u42", "u42"));
        assert_eq!(f.decisions.try_recv().unwrap(), out.decision);
    }

    #[tokio::test]
    async fn unknown_recipient_is_suppressed_for_normal_priority() {
        let mut f = fixture(memory_store());

        let out = f.gate.decide("game.u7", "u7", &msg(), Priority::Normal).await.unwrap();

        assert_eq!(out.decision.outcome, DecisionOutcome::Suppressed);
        assert_eq!(out.decision.source, DecisionSource::CacheMissGraceful);
        assert!(out.timetoken.is_none());
        assert_eq!(f.transport.sent_count(), 0);
        assert_eq!(f.oracle.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(f.decisions.try_recv().is_ok());
    }

    #[tokio::test]
    async fn critical_miss_escalates_and_repairs_store() {
        let store = memory_store();
        let f = fixture(store.clone());
        f.oracle.set_occupants("game.u7", &["u7"]);

        let out = f.gate.decide("game.u7", "u7", &msg(), Priority::Critical).await.unwrap();

        assert_eq!(out.decision.outcome, DecisionOutcome::SentAfterEscalation);
        assert_eq!(out.decision.source, DecisionSource::GroundTruthVerified);
        assert!(f.transport.sent_to("game.u7", "u7"));
        assert!(store.is_online("game.u7", "u7").await.unwrap());
    }

    #[tokio::test]
    async fn critical_miss_confirmed_offline_is_suppressed() {
        let store = memory_store();
        let f = fixture(store.clone());
        f.oracle.set_occupants("game.u7", &["someone-else"]);

        let out = f.gate.decide("game.u7", "u7", &msg(), Priority::Critical).await.unwrap();

        assert_eq!(out.decision.outcome, DecisionOutcome::Suppressed);
        assert_eq!(out.decision.source, DecisionSource::GroundTruthVerified);
        assert_eq!(f.transport.sent_count(), 0);
        assert!(!store.is_online("game.u7", "u7").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_fails_open_for_every_priority() {
        let f = fixture(Arc::new(UnavailableStore));
        for priority in [Priority::Low, Priority::Normal, Priority::High, Priority::Critical] {
            let out = f.gate.decide("c", "r", &msg(), priority).await.unwrap();
            assert_eq!(out.decision.outcome, DecisionOutcome::Sent);
            assert_eq!(out.decision.source, DecisionSource::FailOpen);
        }
        assert_eq!(f.transport.sent_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_fails_open() {
        let f = fixture(Arc::new(HangingStore));
        let out = f.gate.decide("c", "r", &msg(), Priority::Low).await.unwrap();
        assert_eq!(out.decision.outcome, DecisionOutcome::Sent);
        assert!(out.decision.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn escalation_timeout_fails_open() {
        let f = fixture(memory_store());
        f.oracle.set_occupants("c", &["r"]);
        f.oracle.set_delay(Duration::from_secs(5));

        let out = f.gate.decide("c", "r", &msg(), Priority::Critical).await.unwrap();

        assert_eq!(out.decision.outcome, DecisionOutcome::Sent);
        assert_eq!(out.decision.source, DecisionSource::FailOpen);
    }

    #[tokio::test]
    async fn escalation_failure_fails_open() {
        let f = fixture(memory_store());
        f.oracle.set_failing(true);

        let out = f.gate.decide("c", "r", &msg(), Priority::Critical).await.unwrap();

        assert_eq!(out.decision.source, DecisionSource::FailOpen);
        assert!(f.transport.sent_to("c", "r"));
    }

    #[tokio::test]
    async fn transport_failure_is_reported_and_decision_still_logged() {
        let store = memory_store();
        store.upsert("c", "r", Utc::now()).await.unwrap();
        let mut f = fixture(store);
        f.transport.set_failing(true);

        let result = f.gate.decide("c", "r", &msg(), Priority::Normal).await;

        assert_matches!(result, Err(TransportError::Unreachable(_)));
        let logged = f.decisions.try_recv().unwrap();
        assert_eq!(logged.outcome, DecisionOutcome::Sent);
    }
}

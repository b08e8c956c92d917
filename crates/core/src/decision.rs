//! Publish priorities and gate decisions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Timestamp;

/// Urgency of an outbound message. Only [`Priority::Critical`] may wait on a
/// ground-truth presence query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// An ephemeral update bound for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub payload: serde_json::Value,
}

impl OutboundMessage {
    /// Wrap a payload under a fresh time-ordered id.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload,
        }
    }
}

/// Whether the message went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Sent,
    Suppressed,
    SentAfterEscalation,
}

impl DecisionOutcome {
    pub fn transmits(self) -> bool {
        !matches!(self, DecisionOutcome::Suppressed)
    }
}

/// What the decision was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The online set claimed the recipient is connected.
    CacheHit,
    /// The online set had no live claim and the message was not critical.
    CacheMissGraceful,
    /// An upstream presence query settled the question.
    GroundTruthVerified,
    /// The gate could not decide (store or upstream unavailable) and
    /// published anyway.
    FailOpen,
}

/// Immutable record of one publish-gate invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub channel: String,
    pub recipient_id: String,
    pub message_id: Uuid,
    pub outcome: DecisionOutcome,
    pub source: DecisionSource,
    pub latency_micros: u64,
    pub decided_at: Timestamp,
}

impl GateDecision {
    /// `true` when the gate fell back to publishing without a confident answer.
    pub fn is_degraded(&self) -> bool {
        self.source == DecisionSource::FailOpen
    }
}

//! Normalized presence events.
//!
//! Upstream presence notifications arrive as loosely-typed webhook payloads
//! ([`WebhookPayload`]). [`PresenceEvent::from_webhook`] validates one and
//! produces the canonical [`PresenceEvent`] consumed by the ingestor.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// PresenceEvent
// ---------------------------------------------------------------------------

/// Discriminator for [`PresenceEvent`], mirroring the upstream actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEventKind {
    Join,
    Leave,
    Timeout,
    IntervalBatch,
}

/// Net membership changes reported by one interval summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalDelta {
    pub joined: HashSet<String>,
    pub left: HashSet<String>,
    pub timed_out: HashSet<String>,
}

impl IntervalDelta {
    /// Every recipient that should end the batch offline (`left ∪ timed_out`).
    pub fn departed(&self) -> HashSet<String> {
        self.left.union(&self.timed_out).cloned().collect()
    }

    /// Joined recipients that do not also appear as departed.
    ///
    /// When an id is reported both joined and departed within one interval
    /// the departure wins.
    pub fn net_joined(&self) -> Vec<String> {
        self.joined
            .iter()
            .filter(|id| !self.left.contains(*id) && !self.timed_out.contains(*id))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty() && self.timed_out.is_empty()
    }
}

/// The recipient(s) an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Join(String),
    Leave(String),
    Timeout(String),
    Interval(IntervalDelta),
}

/// A presence notification after validation.
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub channel: String,
    pub change: PresenceChange,
    /// Occupant count as reported by upstream, if any.
    pub occupancy_hint: Option<u64>,
    /// The interval delta was truncated and cannot be trusted on its own.
    pub overflowed: bool,
    /// When the ingestor received the event (not the upstream event time).
    pub observed_at: Timestamp,
}

impl PresenceEvent {
    fn new(channel: impl Into<String>, change: PresenceChange, observed_at: Timestamp) -> Self {
        Self {
            channel: channel.into(),
            change,
            occupancy_hint: None,
            overflowed: false,
            observed_at,
        }
    }

    pub fn join(channel: impl Into<String>, recipient: impl Into<String>, at: Timestamp) -> Self {
        Self::new(channel, PresenceChange::Join(recipient.into()), at)
    }

    pub fn leave(channel: impl Into<String>, recipient: impl Into<String>, at: Timestamp) -> Self {
        Self::new(channel, PresenceChange::Leave(recipient.into()), at)
    }

    pub fn timeout(channel: impl Into<String>, recipient: impl Into<String>, at: Timestamp) -> Self {
        Self::new(channel, PresenceChange::Timeout(recipient.into()), at)
    }

    pub fn interval(channel: impl Into<String>, delta: IntervalDelta, at: Timestamp) -> Self {
        Self::new(channel, PresenceChange::Interval(delta), at)
    }

    /// Mark the event's delta as truncated.
    pub fn with_overflow(mut self) -> Self {
        self.overflowed = true;
        self
    }

    pub fn kind(&self) -> PresenceEventKind {
        match self.change {
            PresenceChange::Join(_) => PresenceEventKind::Join,
            PresenceChange::Leave(_) => PresenceEventKind::Leave,
            PresenceChange::Timeout(_) => PresenceEventKind::Timeout,
            PresenceChange::Interval(_) => PresenceEventKind::IntervalBatch,
        }
    }

    /// Validate a raw webhook payload and stamp it with `observed_at`.
    ///
    /// Rejects unknown actions, a missing or blank channel, and
    /// single-recipient actions without a `uuid`.
    pub fn from_webhook(payload: WebhookPayload, observed_at: Timestamp) -> Result<Self, CoreError> {
        let channel = payload
            .channel
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CoreError::Validation("presence event has no channel".into()))?;

        let single = |uuid: Option<String>| {
            uuid.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
                CoreError::Validation(format!(
                    "presence action '{}' requires a uuid",
                    payload.action
                ))
            })
        };

        let change = match payload.action.as_str() {
            "join" => PresenceChange::Join(single(payload.uuid)?),
            "leave" => PresenceChange::Leave(single(payload.uuid)?),
            "timeout" => PresenceChange::Timeout(single(payload.uuid)?),
            "interval" => PresenceChange::Interval(IntervalDelta {
                joined: payload.join.into_iter().collect(),
                left: payload.leave.into_iter().collect(),
                timed_out: payload.timeout.into_iter().collect(),
            }),
            other => {
                return Err(CoreError::Validation(format!(
                    "unknown presence action '{other}'"
                )))
            }
        };

        Ok(Self {
            channel,
            change,
            occupancy_hint: payload.occupancy,
            overflowed: payload.here_now_refresh,
            observed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// Presence notification as delivered by the upstream webhook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// `join`, `leave`, `timeout` or `interval`.
    pub action: String,
    pub channel: Option<String>,
    /// Recipient id for single-recipient actions.
    pub uuid: Option<String>,
    #[serde(default)]
    pub join: Vec<String>,
    #[serde(default)]
    pub leave: Vec<String>,
    #[serde(default)]
    pub timeout: Vec<String>,
    pub occupancy: Option<u64>,
    /// Set by upstream when the interval delta was truncated.
    #[serde(default)]
    pub here_now_refresh: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Scripted collaborators for exercising the engine without a network.
//!
//! Used by this crate's unit tests and by the API crate's integration tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use herald_core::decision::OutboundMessage;
use herald_core::types::{Timestamp, Timetoken};

use crate::store::{OnlineSetStore, StoreError};
use crate::upstream::{MessageTransport, PresenceOracle, TransportError, UpstreamError};

// ---------------------------------------------------------------------------
// ScriptedOracle
// ---------------------------------------------------------------------------

/// Presence oracle answering from an in-memory occupant table.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    occupants: DashMap<String, HashSet<String>>,
    delay_millis: AtomicU64,
    failing: AtomicBool,
    /// Number of upstream queries served (including failed ones).
    pub calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_occupants(&self, channel: &str, ids: &[&str]) {
        self.occupants.insert(
            channel.to_string(),
            ids.iter().map(|id| id.to_string()).collect(),
        );
    }

    /// Delay every answer by `delay` (tokio time, so it honours a paused clock).
    pub fn set_delay(&self, delay: Duration) {
        self.delay_millis
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PresenceOracle for ScriptedOracle {
    async fn here_now(&self, channel: &str) -> Result<HashSet<String>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_millis.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Status(503));
        }
        Ok(self
            .occupants
            .get(channel)
            .map(|ids| ids.clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

/// Transport that remembers what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: DashMap<u64, (String, String, OutboundMessage)>,
    next: AtomicU64,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    /// Whether any message was sent to `(channel, recipient)`.
    pub fn sent_to(&self, channel: &str, recipient: &str) -> bool {
        self.sent
            .iter()
            .any(|e| e.value().0 == channel && e.value().1 == recipient)
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        message: &OutboundMessage,
    ) -> Result<Timetoken, TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("scripted outage".into()));
        }
        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        self.sent.insert(
            seq,
            (channel.to_string(), recipient.to_string(), message.clone()),
        );
        Ok(format!("{:017}", seq + 1))
    }
}

// ---------------------------------------------------------------------------
// Broken stores
// ---------------------------------------------------------------------------

/// A store that can never be reached.
#[derive(Debug, Default)]
pub struct UnavailableStore;

fn unreachable_store<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection refused".into()))
}

#[async_trait]
impl OnlineSetStore for UnavailableStore {
    async fn is_online(&self, _: &str, _: &str) -> Result<bool, StoreError> {
        unreachable_store()
    }

    async fn upsert(&self, _: &str, _: &str, _: Timestamp) -> Result<(), StoreError> {
        unreachable_store()
    }

    async fn remove(&self, _: &str, _: &str) -> Result<(), StoreError> {
        unreachable_store()
    }

    async fn bulk_upsert(&self, _: &str, _: &[String], _: Timestamp) -> Result<(), StoreError> {
        unreachable_store()
    }

    async fn bulk_remove(&self, _: &str, _: &[String]) -> Result<(), StoreError> {
        unreachable_store()
    }

    async fn replace_channel(&self, _: &str, _: &[String], _: Timestamp) -> Result<(), StoreError> {
        unreachable_store()
    }

    async fn members(&self, _: &str) -> Result<HashSet<String>, StoreError> {
        unreachable_store()
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        unreachable_store()
    }
}

/// A store whose calls never complete.
#[derive(Debug, Default)]
pub struct HangingStore;

#[async_trait]
impl OnlineSetStore for HangingStore {
    async fn is_online(&self, _: &str, _: &str) -> Result<bool, StoreError> {
        std::future::pending().await
    }

    async fn upsert(&self, _: &str, _: &str, _: Timestamp) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn remove(&self, _: &str, _: &str) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn bulk_upsert(&self, _: &str, _: &[String], _: Timestamp) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn bulk_remove(&self, _: &str, _: &[String]) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn replace_channel(&self, _: &str, _: &[String], _: Timestamp) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn members(&self, _: &str) -> Result<HashSet<String>, StoreError> {
        std::future::pending().await
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        std::future::pending().await
    }
}

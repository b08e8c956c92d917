//! Online-set store: best-known membership per channel with TTL expiry.
//!
//! [`OnlineSetStore`] is the seam shared by the ingestor (writes), the
//! reconciliation engine (whole-channel replacement) and the publish gate
//! (reads). [`MemoryOnlineSet`] is the in-process implementation used by
//! single-node deployments.
//!
//! An entry is a *claim* that a recipient is connected. It stops counting as
//! online once `expires_at` passes, whether or not it has been evicted yet.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use herald_core::clock::Clock;
use herald_core::types::Timestamp;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached at all.
    #[error("Online-set store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// OnlineSetEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineSetEntry {
    /// Last event or reconciliation that asserted the recipient is online.
    pub last_confirmed_at: Timestamp,
    pub expires_at: Timestamp,
}

impl OnlineSetEntry {
    pub fn new(confirmed_at: Timestamp, ttl: chrono::Duration) -> Self {
        Self {
            last_confirmed_at: confirmed_at,
            expires_at: confirmed_at + ttl,
        }
    }

    pub fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

// ---------------------------------------------------------------------------
// OnlineSetStore
// ---------------------------------------------------------------------------

/// Concurrent (channel, recipient) membership with expiry.
///
/// Implementations must be safe for concurrent use without caller-side
/// locking. No ordering is guaranteed across channels.
#[async_trait]
pub trait OnlineSetStore: Send + Sync {
    /// `true` only if a live (unexpired) entry exists.
    async fn is_online(&self, channel: &str, recipient: &str) -> Result<bool, StoreError>;

    async fn upsert(
        &self,
        channel: &str,
        recipient: &str,
        confirmed_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Removing an absent entry is a no-op.
    async fn remove(&self, channel: &str, recipient: &str) -> Result<(), StoreError>;

    async fn bulk_upsert(
        &self,
        channel: &str,
        recipients: &[String],
        confirmed_at: Timestamp,
    ) -> Result<(), StoreError>;

    async fn bulk_remove(&self, channel: &str, recipients: &[String]) -> Result<(), StoreError>;

    /// Atomically replace the whole membership of `channel`.
    ///
    /// Concurrent readers observe either the complete previous set or the
    /// complete new one.
    async fn replace_channel(
        &self,
        channel: &str,
        recipients: &[String],
        confirmed_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Live members of `channel`, read as one consistent snapshot.
    async fn members(&self, channel: &str) -> Result<HashSet<String>, StoreError>;

    /// Evict expired entries everywhere; returns how many were dropped.
    async fn sweep_expired(&self) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryOnlineSet
// ---------------------------------------------------------------------------

type ChannelMembers = HashMap<String, OnlineSetEntry>;

/// In-process online set.
///
/// Channels live in a sharded [`DashMap`]; each value is the full member map
/// of one channel. Single-key writes lock only the shard holding that
/// channel, and [`replace_channel`](OnlineSetStore::replace_channel) swaps the
/// member map in a single insert, which is what makes it atomic for readers.
pub struct MemoryOnlineSet {
    channels: DashMap<String, ChannelMembers>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryOnlineSet {
    pub fn new(ttl: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            channels: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Number of channels holding at least one entry (live or not yet swept).
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Raw entry lookup, ignoring expiry.
    pub fn entry(&self, channel: &str, recipient: &str) -> Option<OnlineSetEntry> {
        self.channels
            .get(channel)
            .and_then(|members| members.get(recipient).copied())
    }

    fn upsert_into(&self, members: &mut ChannelMembers, recipient: &str, confirmed_at: Timestamp) {
        let fresh = OnlineSetEntry::new(confirmed_at, self.ttl);
        members
            .entry(recipient.to_string())
            .and_modify(|existing| {
                // Out-of-order events must not shorten a newer claim.
                if fresh.last_confirmed_at > existing.last_confirmed_at {
                    *existing = fresh;
                }
            })
            .or_insert(fresh);
    }

    fn evict_expired(&self, channel: &str, recipient: &str, now: Timestamp) {
        if let Some(mut members) = self.channels.get_mut(channel) {
            if members.get(recipient).is_some_and(|e| !e.is_live(now)) {
                members.remove(recipient);
            }
        }
        self.channels.remove_if(channel, |_, members| members.is_empty());
    }
}

#[async_trait]
impl OnlineSetStore for MemoryOnlineSet {
    async fn is_online(&self, channel: &str, recipient: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let state = self
            .channels
            .get(channel)
            .and_then(|members| members.get(recipient).map(|e| e.is_live(now)));

        match state {
            Some(true) => Ok(true),
            Some(false) => {
                self.evict_expired(channel, recipient, now);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn upsert(
        &self,
        channel: &str,
        recipient: &str,
        confirmed_at: Timestamp,
    ) -> Result<(), StoreError> {
        let mut members = self.channels.entry(channel.to_string()).or_default();
        self.upsert_into(&mut members, recipient, confirmed_at);
        Ok(())
    }

    async fn remove(&self, channel: &str, recipient: &str) -> Result<(), StoreError> {
        if let Some(mut members) = self.channels.get_mut(channel) {
            members.remove(recipient);
        }
        self.channels.remove_if(channel, |_, members| members.is_empty());
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        channel: &str,
        recipients: &[String],
        confirmed_at: Timestamp,
    ) -> Result<(), StoreError> {
        if recipients.is_empty() {
            return Ok(());
        }
        let mut members = self.channels.entry(channel.to_string()).or_default();
        for recipient in recipients {
            self.upsert_into(&mut members, recipient, confirmed_at);
        }
        Ok(())
    }

    async fn bulk_remove(&self, channel: &str, recipients: &[String]) -> Result<(), StoreError> {
        if let Some(mut members) = self.channels.get_mut(channel) {
            for recipient in recipients {
                members.remove(recipient);
            }
        }
        self.channels.remove_if(channel, |_, members| members.is_empty());
        Ok(())
    }

    async fn replace_channel(
        &self,
        channel: &str,
        recipients: &[String],
        confirmed_at: Timestamp,
    ) -> Result<(), StoreError> {
        let entry = OnlineSetEntry::new(confirmed_at, self.ttl);
        let replacement: ChannelMembers = recipients
            .iter()
            .map(|recipient| (recipient.clone(), entry))
            .collect();

        if replacement.is_empty() {
            self.channels.remove(channel);
        } else {
            self.channels.insert(channel.to_string(), replacement);
        }
        Ok(())
    }

    async fn members(&self, channel: &str) -> Result<HashSet<String>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .channels
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, e)| e.is_live(now))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut evicted = 0;
        self.channels.retain(|_, members| {
            let before = members.len();
            members.retain(|_, e| e.is_live(now));
            evicted += before - members.len();
            !members.is_empty()
        });
        Ok(evicted)
    }
}

// ---------------------------------------------------------------------------
// Background sweep
// ---------------------------------------------------------------------------

/// Periodically evict expired entries until `cancel` fires.
pub async fn run_sweeper(
    store: Arc<dyn OnlineSetStore>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Online-set sweeper cancelled");
                break;
            }
            _ = interval.tick() => {
                match store.sweep_expired().await {
                    Ok(0) => {}
                    Ok(evicted) => tracing::debug!(evicted, "Evicted expired presence claims"),
                    Err(e) => tracing::warn!(error = %e, "Online-set sweep failed"),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

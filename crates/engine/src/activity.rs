//! Recently-active channel tracking for the scheduled reconciliation sweep.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Last time each channel saw presence or publish traffic.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    last_seen: DashMap<String, Instant>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, channel: &str) {
        let now = Instant::now();
        match self.last_seen.get_mut(channel) {
            Some(mut seen) => *seen = now,
            None => {
                self.last_seen.insert(channel.to_string(), now);
            }
        }
    }

    /// Whether `channel` was touched within `window`.
    pub fn is_active(&self, channel: &str, window: Duration) -> bool {
        self.last_seen
            .get(channel)
            .is_some_and(|seen| seen.elapsed() <= window)
    }

    /// Channels touched within `window`. Older channels are forgotten.
    pub fn active_within(&self, window: Duration) -> Vec<String> {
        self.last_seen.retain(|_, seen| seen.elapsed() <= window);
        self.last_seen.iter().map(|e| e.key().clone()).collect()
    }
}

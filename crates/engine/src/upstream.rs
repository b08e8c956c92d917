//! Seams to the external presence subsystem and message transport.
//!
//! The engine never talks to the network itself; it is handed an
//! implementation of each trait at startup.

use std::collections::HashSet;

use async_trait::async_trait;
use herald_core::decision::OutboundMessage;
use herald_core::types::Timetoken;

/// Failure of a ground-truth presence query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// The request could not be completed (network, DNS, connection reset).
    #[error("Upstream request failed: {0}")]
    Request(String),

    /// The presence service answered with a non-2xx status.
    #[error("Upstream returned HTTP {0}")]
    Status(u16),

    /// The response body did not match the expected shape.
    #[error("Upstream response could not be decoded: {0}")]
    Decode(String),
}

/// Failure to hand a message to the downstream transport.
///
/// Distinct from a suppression: the gate decided to publish and the publish
/// itself failed. Callers retry per their own policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Transport rejected message: {0}")]
    Rejected(String),

    #[error("Transport unreachable: {0}")]
    Unreachable(String),
}

/// Authoritative "who is here now" answers.
#[async_trait]
pub trait PresenceOracle: Send + Sync {
    /// Every recipient currently connected to `channel`.
    async fn here_now(&self, channel: &str) -> Result<HashSet<String>, UpstreamError>;

    /// Whether `recipient` is currently connected to `channel`.
    async fn is_present(&self, channel: &str, recipient: &str) -> Result<bool, UpstreamError> {
        Ok(self.here_now(channel).await?.contains(recipient))
    }
}

/// Downstream publish operation.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        message: &OutboundMessage,
    ) -> Result<Timetoken, TransportError>;
}

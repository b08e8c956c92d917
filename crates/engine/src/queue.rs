//! Bounded ingest queue backed by a `tokio::sync::broadcast` channel.
//!
//! [`IngestQueue`] decouples whatever receives presence webhooks from the
//! ingestor that applies them. When the buffer is full the oldest unconsumed
//! events are overwritten, and the consumer observes a
//! `RecvError::Lagged(n)` telling it how many were lost.

use herald_core::presence::PresenceEvent;
use tokio::sync::broadcast;

/// Receiving half handed to the ingest loop.
pub type IngestReceiver = broadcast::Receiver<PresenceEvent>;

/// Producer side of the ingest queue. Cheap to share via `Arc`.
pub struct IngestQueue {
    sender: broadcast::Sender<PresenceEvent>,
}

impl IngestQueue {
    /// Create a queue and its single consumer.
    ///
    /// The consumer is created here, not later, so events pushed before the
    /// ingest loop starts are buffered rather than discarded. `capacity` is
    /// rounded up to a power of two by tokio and must be non-zero.
    pub fn new(capacity: usize) -> (Self, IngestReceiver) {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue an event without waiting.
    ///
    /// Returns `false` if no consumer is attached (the ingest loop has
    /// exited), in which case the event is dropped.
    pub fn push(&self, event: PresenceEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Events currently buffered for the slowest consumer.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

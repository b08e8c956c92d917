//! Herald gating engine.
//!
//! Keeps a TTL-bounded online set per channel, fed by presence webhooks and
//! corrected by periodic ground-truth reconciliation, and consults it before
//! every outbound publish.
//!
//! - [`store`]: the online-set store trait and its in-memory implementation.
//! - [`ingest`]: applies presence events to the store.
//! - [`reconcile`]: coalesced, rate-limited ground-truth reconciliation.
//! - [`gate`]: per-message publish decisions.
//! - [`decision_log`]: buffered audit trail of gate decisions.
//! - [`service`]: wires everything together and runs the background loops.

pub mod activity;
pub mod decision_log;
pub mod gate;
pub mod ingest;
pub mod metrics;
pub mod queue;
pub mod reconcile;
pub mod service;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod upstream;

pub use gate::{PublishGate, PublishOutcome};
pub use metrics::{Metrics, MetricsSnapshot};
pub use reconcile::{ReconcileError, ReconciliationEngine, ReconciliationReport};
pub use service::Herald;
pub use store::{MemoryOnlineSet, OnlineSetStore, StoreError};
pub use upstream::{MessageTransport, PresenceOracle, TransportError, UpstreamError};

use std::sync::Arc;

use herald_engine::ingest::Ingestor;
use herald_engine::{Herald, Metrics, PublishGate, ReconciliationEngine};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Accepts presence webhooks onto the ingest queue.
    pub ingestor: Arc<Ingestor>,
    pub engine: Arc<ReconciliationEngine>,
    pub gate: Arc<PublishGate>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Borrow the shared components of a running engine.
    pub fn new(config: ServerConfig, herald: &Herald) -> Self {
        Self {
            config: Arc::new(config),
            ingestor: Arc::clone(&herald.ingestor),
            engine: Arc::clone(&herald.engine),
            gate: Arc::clone(&herald.gate),
            metrics: Arc::clone(&herald.metrics),
        }
    }
}

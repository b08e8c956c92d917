pub mod health;
pub mod presence;
pub mod publish;
pub mod reconcile;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /presence/webhook        presence notification ingress (POST)
/// /publish                 gated publish (POST)
/// /reconcile/{channel}     on-demand reconciliation (POST)
/// /metrics                 counter and gauge snapshot (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/presence", presence::router())
        .nest("/publish", publish::router())
        .nest("/reconcile", reconcile::router())
        .route("/metrics", get(handlers::metrics::get_metrics))
}

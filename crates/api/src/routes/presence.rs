//! Route definitions for `/presence`.

use axum::routing::post;
use axum::Router;

use crate::handlers::presence;
use crate::state::AppState;

/// Routes mounted at `/presence`.
///
/// ```text
/// POST   /webhook         -> receive_webhook
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(presence::receive_webhook))
}

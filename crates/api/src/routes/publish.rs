use axum::routing::post;
use axum::Router;

use crate::handlers::publish;
use crate::state::AppState;

/// Routes mounted at `/publish`.
///
/// ```text
/// POST   /                -> publish_message
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(publish::publish_message))
}

use axum::routing::post;
use axum::Router;

use crate::handlers::reconcile;
use crate::state::AppState;

/// Routes mounted at `/reconcile`.
///
/// ```text
/// POST   /{channel}       -> reconcile_channel
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{channel}", post(reconcile::reconcile_channel))
}

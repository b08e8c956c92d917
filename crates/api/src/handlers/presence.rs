//! Handler for presence webhooks delivered by the realtime provider.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use herald_core::presence::WebhookPayload;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /api/v1/presence/webhook
///
/// Validate one presence notification and push it onto the ingest queue.
/// Returns 202 once enqueued; the online set is updated asynchronously.
/// Malformed bodies and invalid events are rejected with 400.
pub async fn receive_webhook(
    State(state): State<AppState>,
    body: Result<Json<WebhookPayload>, JsonRejection>,
) -> AppResult<StatusCode> {
    let Json(payload) = body.map_err(|rejection| {
        state.metrics.webhook_dropped.inc();
        AppError::BadRequest(rejection.body_text())
    })?;

    state.ingestor.submit(payload)?;
    Ok(StatusCode::ACCEPTED)
}

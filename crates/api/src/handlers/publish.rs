//! Handler for gated publishes.

use axum::extract::State;
use axum::Json;
use herald_core::decision::{OutboundMessage, Priority};
use herald_engine::PublishOutcome;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /api/v1/publish`.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub channel: String,
    pub recipient: String,
    pub message: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
}

/// POST /api/v1/publish
///
/// Run the message through the publish gate. Returns the gate decision and,
/// when the message was transmitted, the transport's timetoken. A suppressed
/// message is still a 200. Transport failures map to 502.
pub async fn publish_message(
    State(state): State<AppState>,
    Json(input): Json<PublishRequest>,
) -> AppResult<Json<DataResponse<PublishOutcome>>> {
    if input.channel.trim().is_empty() || input.recipient.trim().is_empty() {
        return Err(AppError::BadRequest(
            "channel and recipient must not be empty".into(),
        ));
    }

    let message = OutboundMessage::new(input.message);
    let outcome = state
        .gate
        .decide(&input.channel, &input.recipient, &message, input.priority)
        .await?;

    Ok(Json(DataResponse { data: outcome }))
}

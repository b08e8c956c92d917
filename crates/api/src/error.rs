use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use herald_core::error::CoreError;
use herald_engine::ingest::IngestError;
use herald_engine::{ReconcileError, TransportError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds the engine's error types.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `herald_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An on-demand reconciliation did not complete.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// The gate allowed a publish but the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidEvent(msg) => AppError::Core(CoreError::Validation(msg)),
            other => AppError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(CoreError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }

            // --- Reconciliation ---
            AppError::Reconcile(err) => match err {
                ReconcileError::Throttled { .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, "THROTTLED", err.to_string())
                }
                ReconcileError::UpstreamQueryFailed(_) => {
                    (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", err.to_string())
                }
                ReconcileError::Timeout => {
                    (StatusCode::BAD_GATEWAY, "UPSTREAM_TIMEOUT", err.to_string())
                }
                ReconcileError::StoreUnavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    err.to_string(),
                ),
            },

            // --- Transport ---
            AppError::Transport(err) => {
                (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR", err.to_string())
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

use axum::extract::State;
use axum::Json;
use herald_engine::MetricsSnapshot;

use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/metrics
///
/// Snapshot of every counter plus the store cache-miss rate gauge.
pub async fn get_metrics(State(state): State<AppState>) -> Json<DataResponse<MetricsSnapshot>> {
    Json(DataResponse {
        data: state.metrics.snapshot(),
    })
}

use axum::extract::{Path, State};
use axum::Json;
use herald_engine::ReconciliationReport;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/reconcile/{channel}
///
/// Replace the channel's cached membership with upstream ground truth and
/// wait for the result. Joins an in-flight query for the same channel.
/// Returns 429 inside the minimum spacing window and 502 when upstream fails.
pub async fn reconcile_channel(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> AppResult<Json<DataResponse<ReconciliationReport>>> {
    let report = state.engine.reconcile(&channel).await?;

    tracing::info!(
        channel = %report.channel,
        occupants = report.occupants,
        "On-demand reconciliation completed",
    );

    Ok(Json(DataResponse { data: report }))
}

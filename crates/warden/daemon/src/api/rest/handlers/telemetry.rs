//! Telemetry intake

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use warden_recovery::IngestReceipt;
use warden_types::TelemetrySnapshot;

/// Accept one telemetry snapshot. Detection runs inline; recovery continues
/// in the background.
pub async fn ingest_telemetry(
    State(state): State<AppState>,
    payload: Result<Json<TelemetrySnapshot>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IngestReceipt>)> {
    let Json(snapshot) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let receipt = state.orchestrator.ingest(snapshot).await?;
    if let Some(incident_id) = &receipt.incident_id {
        tracing::debug!(
            device_id = %receipt.device_id,
            incident_id = %incident_id,
            symptoms = receipt.symptoms.len(),
            "Telemetry accepted"
        );
    }

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

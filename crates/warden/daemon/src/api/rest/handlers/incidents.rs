//! Incident queries

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use warden_recovery::RecoveryError;
use warden_types::{DeviceId, Incident, IncidentState};

/// List incidents query params
#[derive(Debug, Deserialize)]
pub struct ListIncidentsQuery {
    pub state: Option<String>,
}

/// List incidents, optionally in one state
pub async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<ListIncidentsQuery>,
) -> ApiResult<Json<Vec<Incident>>> {
    let filter = query
        .state
        .as_deref()
        .map(str::parse::<IncidentState>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    Ok(Json(state.orchestrator.incidents(filter)))
}

/// Current or most recent incident of a device
pub async fn get_incident(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Incident>> {
    let device_id = DeviceId::new(device_id);
    let incident = state
        .orchestrator
        .incident(&device_id)
        .ok_or(RecoveryError::IncidentNotFound(device_id))?;

    Ok(Json(incident))
}

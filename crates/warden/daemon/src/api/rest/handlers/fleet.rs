//! Fleet summary, learned patterns and topology

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use warden_recovery::{DependencyGraph, FleetSummary};
use warden_types::Pattern;

/// Incident counts, storm breaker state and fleet size
pub async fn fleet_summary(State(state): State<AppState>) -> Json<FleetSummary> {
    Json(state.orchestrator.fleet_summary())
}

/// Learned patterns ordered by signature
pub async fn list_patterns(State(state): State<AppState>) -> Json<Vec<Pattern>> {
    Json(state.orchestrator.patterns().list())
}

/// Current dependency graph
pub async fn get_topology(State(state): State<AppState>) -> Json<DependencyGraph> {
    let topology = state.orchestrator.topology();
    let graph = topology.read().await.clone();
    Json(graph)
}

/// Topology update response
#[derive(Debug, Serialize)]
pub struct TopologyUpdated {
    pub services: usize,
}

/// Replace the dependency graph. Plans already executing keep the graph
/// they were computed with.
pub async fn put_topology(
    State(state): State<AppState>,
    payload: Result<Json<DependencyGraph>, JsonRejection>,
) -> ApiResult<Json<TopologyUpdated>> {
    let Json(graph) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let services = graph.len();

    state.orchestrator.replace_topology(graph).await?;

    Ok(Json(TopologyUpdated { services }))
}

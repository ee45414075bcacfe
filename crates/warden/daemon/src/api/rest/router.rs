//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

/// Create the main API router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let router = Router::new()
        // Daemon
        .route("/health", get(handlers::health_check))
        // Telemetry
        .route("/telemetry", post(handlers::ingest_telemetry))
        // Incidents
        .route("/incidents", get(handlers::list_incidents))
        .route("/incidents/:device_id", get(handlers::get_incident))
        // Fleet
        .route("/fleet/summary", get(handlers::fleet_summary))
        // Learned patterns
        .route("/patterns", get(handlers::list_patterns))
        // Topology
        .route(
            "/topology",
            get(handlers::get_topology).put(handlers::put_topology),
        )
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(TraceLayer::new_for_http());

    let router = if server.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

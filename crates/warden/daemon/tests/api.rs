//! HTTP API tests driven through the router without a listener.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use warden_daemon::api::create_router;
use warden_daemon::api::rest::state::AppState;
use warden_daemon::{build_orchestrator, DaemonConfig};

fn app() -> Router {
    let config = DaemonConfig::default();
    let orchestrator = build_orchestrator(&config).unwrap();
    create_router(AppState::new(orchestrator), &config.server)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_malformed_telemetry_is_rejected() {
    let request = json_request("POST", "/telemetry", "{\"device_id\": ".to_string());
    let (status, body) = send(app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_telemetry_without_metrics_is_rejected() {
    let payload = json!({
        "device_id": "sensor-1",
        "timestamp": Utc::now(),
        "metrics": {}
    });
    let request = json_request("POST", "/telemetry", payload.to_string());
    let (status, body) = send(app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_symptomatic_telemetry_opens_incident() {
    let app = app();
    let payload = json!({
        "device_id": "sensor-1",
        "timestamp": Utc::now(),
        "metrics": {"battery_voltage": 3.0}
    });
    let request = json_request("POST", "/telemetry", payload.to_string());
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["incident_id"].is_string());
    assert_eq!(body["symptoms"][0]["kind"], "LOW_BATTERY");

    let (status, incident) = send(app, get("/incidents/sensor-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(incident["id"], body["incident_id"]);
}

#[tokio::test]
async fn test_healthy_telemetry_opens_nothing() {
    let payload = json!({
        "device_id": "sensor-2",
        "timestamp": Utc::now(),
        "metrics": {"battery_voltage": 3.9, "cpu_usage": 20.0}
    });
    let request = json_request("POST", "/telemetry", payload.to_string());
    let (status, body) = send(app(), request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.get("incident_id").is_none());
    assert_eq!(body["symptoms"], json!([]));
}

#[tokio::test]
async fn test_unknown_incident_is_not_found() {
    let (status, body) = send(app(), get("/incidents/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_incident_state_filter() {
    let (status, body) = send(app(), get("/incidents?state=escalated")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = send(app(), get("/incidents?state=sleeping")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_fleet_summary_starts_empty() {
    let (status, body) = send(app(), get("/fleet/summary")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["known_devices"], 0);
    assert_eq!(body["open_incidents"], 0);
}

#[tokio::test]
async fn test_patterns_start_empty() {
    let (status, body) = send(app(), get("/patterns")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_topology_replacement() {
    let app = app();

    let cyclic = json!({"a": ["b"], "b": ["a"]});
    let (status, _) = send(
        app.clone(),
        json_request("PUT", "/topology", cyclic.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let graph = json!({"api": ["db"], "db": []});
    let (status, body) = send(
        app.clone(),
        json_request("PUT", "/topology", graph.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"], 2);

    let (status, body) = send(app, get("/topology")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["api"], json!(["db"]));
}

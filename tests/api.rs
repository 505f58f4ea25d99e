//! End-to-end tests for the HTTP control API.
//!
//! Requests go straight to the router with `tower::ServiceExt::oneshot`, over
//! services backed by a private in-memory database.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{save_flow, test_services, wait_for_ticks};
use scanflow::server::Services;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app() -> (Router, Services) {
    let services = test_services().await;
    (services.router(), services)
}

async fn send(app: &Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(path);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, json)
}

async fn post_json(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", path, Some(body)).await
}

async fn get_json(app: &Router, path: &str) -> (StatusCode, Value) {
    send(app, "GET", path, None).await
}

fn boiler() -> Value {
    json!({
        "id": "boiler",
        "name": "Boiler",
        "execution_mode": "continuous",
        "scan_rate_ms": 60000,
        "deployed": true,
        "nodes": [
            { "id": "temp", "node_type": "constant", "config": { "value": 80 } },
            { "id": "alarm", "node_type": "passthrough", "trigger": "$input.in > 100" }
        ],
        "edges": [{ "from": "temp", "to": "alarm" }],
        "parameters": [
            { "name": "temp", "node_id": "temp", "node_parameter": "value", "type": "number",
              "constraints": { "min": 0, "max": 500 }, "default": 80 }
        ]
    })
}

#[tokio::test]
async fn health_check_responds() {
    let (app, _services) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn trigger_validation_reports_errors() {
    let (app, _services) = test_app().await;

    let (status, body) = post_json(&app, "/api/triggers/validate", json!({ "expression": "$input.temp > 100" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "valid": true }));

    let (status, body) = post_json(&app, "/api/triggers/validate", json!({ "expression": "process.exit()" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn session_lifecycle_over_http() {
    let (app, services) = test_app().await;
    save_flow(&services, boiler()).await;

    let (status, body) = post_json(&app, "/api/flows/boiler/start", json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "running");
    assert_eq!(body["execution_mode"], "continuous");
    assert_eq!(body["scan_rate_ms"], 60000);
    wait_for_ticks(&services.sessions, "boiler", 1).await;

    let (status, body) = post_json(&app, "/api/flows/boiler/start", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, body) = get_json(&app, "/api/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);

    let (status, body) = get_json(&app, "/api/flows/boiler/status").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["ticks"].as_u64().unwrap() >= 1);

    let (status, body) = post_json(&app, "/api/flows/boiler/stop", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");

    let (status, body) = post_json(&app, "/api/flows/boiler/stop", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn start_errors_map_to_status_codes() {
    let (app, services) = test_app().await;
    save_flow(&services, boiler()).await;

    let (status, body) = post_json(&app, "/api/flows/ghost/start", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, body) = post_json(&app, "/api/flows/boiler/start", json!({ "parameters": { "temp": 900 } })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
    assert_eq!(body["error"]["details"]["errors"].as_array().unwrap().len(), 1);
    assert!(!services.sessions.is_running("boiler").await);
}

#[tokio::test]
async fn parameter_validation_endpoint() {
    let (app, services) = test_app().await;
    save_flow(&services, boiler()).await;

    let (status, body) = post_json(
        &app,
        "/api/flows/boiler/parameters/validate",
        json!({ "parameters": { "temp": "120", "extra": 1 } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["warnings"], json!(["unknown parameter 'extra' will be ignored"]));

    let (status, body) = post_json(&app, "/api/flows/boiler/parameters/validate", json!({ "parameters": { "temp": -1 } })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);

    let (status, _) = post_json(&app, "/api/flows/ghost/parameters/validate", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tick_and_parameter_override_over_http() {
    let (app, services) = test_app().await;
    save_flow(&services, boiler()).await;

    let (status, _) = post_json(&app, "/api/flows/boiler/tick", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    post_json(&app, "/api/flows/boiler/start", json!({})).await;
    wait_for_ticks(&services.sessions, "boiler", 1).await;

    let (status, body) = post_json(&app, "/api/flows/boiler/tick", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "completed");
    assert_eq!(body["skipped"], json!(["alarm"]));

    let (status, body) = send(&app, "PUT", "/api/flows/boiler/parameters", Some(json!({ "parameters": { "temp": 150 } }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["valid"], true);

    let (_, body) = post_json(&app, "/api/flows/boiler/tick", json!({})).await;
    assert_eq!(body["executed"], json!(["temp", "alarm"]));

    services.sessions.stop("boiler").await.unwrap();
}

#[tokio::test]
async fn logs_endpoint_returns_session_entries() {
    let (app, services) = test_app().await;
    let mut flow = boiler();
    flow["execution_mode"] = json!("manual");
    save_flow(&services, flow).await;

    post_json(&app, "/api/flows/boiler/start", json!({})).await;
    common::wait_until_stopped(&services.sessions, "boiler").await;

    let (status, body) = get_json(&app, "/api/flows/boiler/logs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["flow_id"], "boiler");
    let entries = body["entries"].as_array().unwrap();
    assert!(!entries.is_empty());
    assert!(entries[0]["message"].as_str().unwrap().starts_with("session started"));

    let (status, body) = get_json(&app, "/api/flows/boiler/logs?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);

    let (status, body) = get_json(&app, "/api/flows/boiler/logs?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn reconcile_and_reload_endpoints() {
    let (app, services) = test_app().await;
    save_flow(&services, boiler()).await;

    let (status, body) = post_json(&app, "/api/bootstrap/reconcile", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enqueued"].as_array().unwrap().len(), 1);
    assert_eq!(body["enqueued"][0][0], "boiler");

    let (status, body) = post_json(&app, "/api/flows/boiler/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "flow_id": "boiler", "loaded": true }));

    let (status, body) = post_json(&app, "/api/flows/ghost/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loaded"], false);
}

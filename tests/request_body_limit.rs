#[path = "common/mod.rs"]
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{local_config, state_with, StubUpstream};
use http_body_util::BodyExt;
use incident_relay::app;
use serde_json::{json, Value};
use tower::ServiceExt; // for oneshot

fn oversized_accept() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "action": "acepto",
        "incident_id": "INC-1",
        "technician_email": "a@b.com",
        "notes": "X".repeat(200),
    }))
    .unwrap()
}

#[tokio::test]
async fn oversized_body_gets_json_error_with_cors() {
    let stub = StubUpstream::start(200, "Accepted").await;
    let mut cfg = local_config();
    cfg.webhooks.technician = Some(stub.url.clone());
    cfg.max_request_bytes = 64;
    let app = app(state_with(cfg));

    let payload = oversized_accept();
    let req = Request::builder()
        .method("POST")
        .uri("/api/webhook-respuesta")
        .header("content-type", "application/json")
        .header("content-length", payload.len())
        .body(Body::from(payload))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], json!("error"));
    assert_eq!(body["action"], json!("unknown"));
    assert!(body["timestamp"].is_string());
    assert!(body["message"].as_str().unwrap().contains("64"));
    assert!(stub.last_payload().is_none());
}

#[tokio::test]
async fn supervisor_endpoint_enforces_same_limit() {
    let mut cfg = local_config();
    cfg.local_simulation = true;
    cfg.max_request_bytes = 64;
    let app = app(state_with(cfg));

    let req = Request::builder()
        .method("POST")
        .uri("/api/webhook-supervisor")
        .header("content-type", "application/json")
        .body(Body::from(oversized_accept()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok()),
        Some("POST, OPTIONS")
    );
}

#[tokio::test]
async fn body_at_the_limit_is_accepted() {
    let stub = StubUpstream::start(200, "Accepted").await;
    let payload = serde_json::to_vec(&json!({"action": "acepto", "incident_id": "INC-2"})).unwrap();
    let mut cfg = local_config();
    cfg.webhooks.technician = Some(stub.url.clone());
    cfg.max_request_bytes = payload.len();
    let app = app(state_with(cfg));

    let req = Request::builder()
        .method("POST")
        .uri("/api/webhook-respuesta")
        .header("content-type", "application/json")
        .body(Body::from(payload))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(stub.last_payload().unwrap()["incident_id"], json!("INC-2"));
}

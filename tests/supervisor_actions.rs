#[path = "common/mod.rs"]
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{local_config, state_with, StubUpstream};
use http_body_util::BodyExt;
use incident_relay::app;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn post_json(app: Router, path: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn supervisor_requires_action_and_supervisor() {
    let app = app(state_with(local_config()));
    let (status, body) = post_json(app, "/api/webhook-supervisor", json!({"action": "get_incidents"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["required"], json!(["supervisor"]));
}

#[tokio::test]
async fn supervisor_forwards_mapped_payload() {
    let stub = StubUpstream::start(200, "OK").await;
    let mut cfg = local_config();
    cfg.webhooks.supervisor = Some(stub.url.clone());
    let app = app(state_with(cfg));

    let (status, body) = post_json(
        app,
        "/api/webhook-supervisor",
        json!({
            "action": "assign_manual",
            "supervisor": "jefa@plant.com",
            "incident_id": "INC-10",
            "technician": "tech@plant.com",
            "data": {"note": "urgente"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("success"));
    assert_eq!(body["action"], json!("assign_manual"));

    let forwarded = stub.last_payload().unwrap();
    assert_eq!(forwarded["supervisor_email"], json!("jefa@plant.com"));
    assert_eq!(forwarded["technician_email"], json!("tech@plant.com"));
    assert_eq!(forwarded["additional_data"], json!({"note": "urgente"}));
}

#[tokio::test]
async fn supervisor_simulates_when_enabled() {
    let mut cfg = local_config();
    cfg.local_simulation = true;
    let app = app(state_with(cfg));
    let (status, body) = post_json(
        app,
        "/api/webhook-supervisor",
        json!({"action": "pause_escalation", "supervisor": "jefa@plant.com"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("success"));
}

#[tokio::test]
async fn supervisor_without_webhook_or_simulation_fails() {
    let app = app(state_with(local_config()));
    let (status, body) = post_json(
        app,
        "/api/webhook-supervisor",
        json!({"action": "pause_escalation", "supervisor": "jefa@plant.com"}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["action"], json!("pause_escalation"));
}

#[tokio::test]
async fn simulated_pin_check() {
    let mut cfg = local_config();
    cfg.local_simulation = true;
    let app = app(state_with(cfg));

    let (status, body) = post_json(
        app.clone(),
        "/api/validate-pin",
        json!({"action": "validate", "supervisor": "elena.vazquez@plant.com", "pin": "1234"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("success"));
    assert_eq!(body["supervisor"]["name"], json!("Elena Vazquez"));

    let (status, body) = post_json(
        app,
        "/api/validate-pin",
        json!({"action": "validate", "supervisor": "elena.vazquez@plant.com", "pin": "0000"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("error"));
    assert_eq!(body["supervisor"], Value::Null);
}

#[tokio::test]
async fn pin_validation_requires_json_reply() {
    let stub = StubUpstream::start(200, "Accepted").await;
    let mut cfg = local_config();
    cfg.webhooks.validate_pin = Some(stub.url.clone());
    let app = app(state_with(cfg));
    let (status, body) = post_json(
        app,
        "/api/validate-pin",
        json!({"action": "validate", "supervisor": "jefa@plant.com", "pin": "4321"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["body_snippet"], json!("Accepted"));
    assert_eq!(stub.last_payload().unwrap()["pin"], json!("4321"));
}

#[tokio::test]
async fn pin_validation_passes_json_through() {
    let stub = StubUpstream::start(200, r#""{\"status\":\"success\",\"valid\":true}""#).await;
    let mut cfg = local_config();
    cfg.webhooks.validate_pin = Some(stub.url.clone());
    let app = app(state_with(cfg));
    let (status, body) = post_json(
        app,
        "/api/validate-pin",
        json!({"action": "validate", "supervisor": "jefa@plant.com", "pin": "4321"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "success", "valid": true}));
}

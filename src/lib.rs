//! Core library for the incident relay.  This module wires together the
//! configuration, the upstream client and the HTTP handlers that sit between
//! the maintenance dashboards and the automation webhooks.
//!
//! The relay owns no incident state: every request is normalized, forwarded
//! once, and the upstream reply decoded and reshaped for the dashboard.

mod config;
pub mod actions;
pub mod decode;
pub mod error;
pub mod incident;
pub mod relay;
pub mod upstream;
pub mod util;

pub use config::{AppConfig, WebhookConfig, DEFAULT_WEBHOOK_PATTERN};
pub use decode::{decode_response, Decoded};
pub use error::RelayError;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::upstream::UpstreamClient;

/// Internal application state shared across handlers.  Built once at
/// startup from a validated `AppConfig`.
#[derive(Clone)]
pub struct AppState {
    pub webhooks: WebhookConfig,
    pub upstream: UpstreamClient,
    /// Serve generated incidents for the listing action instead of calling upstream.
    pub allow_demo_incidents: bool,
    /// Answer supervisor / PIN requests locally when their webhook is unset.
    pub local_simulation: bool,
    pub simulation_pin: String,
    /// Maximum accepted raw request body size in bytes.
    pub max_request_bytes: usize,
    /// Include diagnostic detail in error replies.
    pub dev_mode: bool,
}

/// Validate `config` and build the handler state from it.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    config.validate()?;
    let AppConfig {
        webhooks,
        allow_demo_incidents,
        local_simulation,
        simulation_pin,
        upstream_timeout_ms,
        max_request_bytes,
        dev_mode,
    } = config;

    if webhooks.technician.is_none() {
        tracing::warn!("MAKE_WEBHOOK_RESPUESTA not set; technician actions will fail");
    }
    if local_simulation {
        tracing::warn!("local simulation enabled for unset supervisor / PIN webhooks");
    }

    let upstream = UpstreamClient::new(upstream_timeout_ms)?;
    Ok(AppState {
        webhooks,
        upstream,
        allow_demo_incidents,
        local_simulation,
        simulation_pin,
        max_request_bytes,
        dev_mode,
    })
}

/// Build state from environment variables.  See `AppConfig::from_env` for
/// the variables read.
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    build_state(AppConfig::from_env()?)
}

/// Build the Axum router and attach handlers.  The router holds a copy
/// of the `AppState` for each invocation.
///
/// Body size is enforced by the handlers so oversized requests still get the
/// JSON error envelope and CORS headers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/webhook-respuesta", any(relay::technician_handler))
        .route("/api/webhook-supervisor", any(relay::supervisor_handler))
        .route("/api/validate-pin", any(relay::validate_pin_handler))
        .route("/healthz", get(healthz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "webhooks": {
            "technician": state.webhooks.technician.is_some(),
            "supervisor": state.webhooks.supervisor.is_some(),
            "validatePin": state.webhooks.validate_pin.is_some(),
        },
        "upstreamTimeoutMs": state.upstream.timeout().as_millis() as u64,
    });
    (StatusCode::OK, Json(json)).into_response()
}

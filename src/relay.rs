//! Request handling for the three webhook families.
//!
//! Each handler answers CORS preflight, enforces its allowed methods, turns
//! the request into a canonical payload, forwards it upstream and shapes the
//! decoded reply according to the action's decode policy.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use http_body_util::LengthLimitError;
use serde_json::{json, Map, Value};

use crate::actions::{action_name, build_outbound, OutboundPayload};
use crate::decode::{decode_response, Decoded};
use crate::error::RelayError;
use crate::incident::{demo_incidents, normalize_incident};
use crate::util::{display_name_from_email, is_present, snippet, RequestMeta, SNIPPET_CHARS};
use crate::AppState;

const TECHNICIAN_METHODS: &str = "GET, POST, OPTIONS";
const SUPERVISOR_METHODS: &str = "POST, OPTIONS";

/// Attach the permissive CORS headers every endpoint sends.
fn with_cors(mut response: Response, methods: &'static str) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(methods),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

fn error_response(state: &AppState, err: RelayError, action: Option<&str>) -> Response {
    if err.is_client_error() {
        tracing::info!(action = ?action, error = %err, "rejected request");
    } else {
        tracing::error!(action = ?action, error = %err, "request failed");
    }
    err.into_envelope(action, state.dev_mode).into_response()
}

/// Body of a POST as a JSON object. Unparseable or non-object bodies read as
/// empty so the missing `action` is what gets reported.
async fn read_json_object(body: Body, limit: usize) -> Result<Map<String, Value>, RelayError> {
    let bytes = match to_bytes(body, limit).await {
        Ok(b) => b,
        Err(err) => {
            let err = err.into_inner();
            if err.downcast_ref::<LengthLimitError>().is_some() {
                tracing::warn!(limit, "request body exceeded limit");
                return Err(RelayError::PayloadTooLarge { limit });
            }
            tracing::warn!(error = %err, "failed to buffer request body");
            return Err(RelayError::Internal(format!("failed to read request body: {}", err)));
        }
    };
    if bytes.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) | Err(_) => {
            tracing::debug!("request body is not a JSON object, treating as empty");
            Ok(Map::new())
        }
    }
}

fn query_object(query: HashMap<String, String>) -> Map<String, Value> {
    query
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

/// `/api/webhook-respuesta`: technician actions.
pub async fn technician_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    headers: axum::http::HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Body,
) -> Response {
    let response = match method {
        Method::OPTIONS => StatusCode::OK.into_response(),
        Method::GET => {
            let meta = RequestMeta::from_parts(&headers, peer.map(|c| c.0));
            relay_technician(&state, query_object(query), &meta).await
        }
        Method::POST => match read_json_object(body, state.max_request_bytes).await {
            Ok(data) => {
                let meta = RequestMeta::from_parts(&headers, peer.map(|c| c.0));
                relay_technician(&state, data, &meta).await
            }
            Err(err) => error_response(&state, err, None),
        },
        _ => error_response(
            &state,
            RelayError::MethodNotAllowed {
                allowed: "GET o POST",
            },
            None,
        ),
    };
    with_cors(response, TECHNICIAN_METHODS)
}

async fn relay_technician(state: &AppState, data: Map<String, Value>, meta: &RequestMeta) -> Response {
    let action = action_name(&data);
    let demo_requested = data
        .get("demo")
        .map(crate::util::value_to_text)
        .is_some_and(|d| d == "1");

    let payload = match build_outbound(data, meta, Utc::now()) {
        Ok(p) => p,
        Err(err) => return error_response(state, err, action.as_deref()),
    };

    if payload.is_listing() && (state.allow_demo_incidents || demo_requested) {
        tracing::info!(action = %payload.action(), "serving demo incidents");
        return (
            StatusCode::OK,
            Json(json!({ "status": "success", "incidents": demo_incidents(Utc::now()) })),
        )
            .into_response();
    }

    let Some(url) = state.webhooks.technician.as_deref() else {
        let err = RelayError::Configuration(
            "Variable MAKE_WEBHOOK_RESPUESTA no configurada".to_string(),
        );
        return error_response(state, err, Some(payload.action()));
    };

    tracing::info!(
        action = %payload.action(),
        canonical = ?payload.spec().map(|s| s.name),
        incident_id = ?payload.incident_id(),
        "forwarding technician action"
    );
    let reply = match state.upstream.post_json(url, &payload.to_json()).await {
        Ok(r) => r,
        Err(err) => return error_response(state, err, Some(payload.action())),
    };

    let decoded = decode_response(&reply.text);
    tracing::debug!(upstream_status = reply.status, outcome = decoded_kind(&decoded), "decoded upstream reply");
    if payload.is_listing() {
        match listing_response(decoded, &reply.text) {
            Ok(incidents) => (
                StatusCode::OK,
                Json(json!({ "status": "success", "incidents": incidents })),
            )
                .into_response(),
            Err(err) => error_response(state, err, Some(payload.action())),
        }
    } else {
        mutation_response(decoded, &reply.text, &payload)
    }
}

fn decoded_kind(decoded: &Decoded) -> &'static str {
    match decoded {
        Decoded::Json(_) => "json",
        Decoded::TextualSuccess => "textual_success",
        Decoded::Undecodable => "undecodable",
    }
}

/// Pull the incident list out of a decoded listing reply and normalize it.
fn listing_response(decoded: Decoded, raw: &str) -> Result<Vec<Value>, RelayError> {
    let now = Utc::now();
    let value = match decoded {
        Decoded::Json(v) => v,
        Decoded::TextualSuccess => {
            tracing::info!("upstream accepted listing without data, returning empty list");
            return Ok(Vec::new());
        }
        Decoded::Undecodable => {
            return Err(RelayError::UpstreamDecode {
                snippet: snippet(raw, SNIPPET_CHARS),
            })
        }
    };
    let list = match &value {
        Value::Object(map) => map
            .get("incidents")
            .and_then(Value::as_array)
            .or_else(|| value.pointer("/data/incidents").and_then(Value::as_array)),
        Value::Array(items) if items.iter().all(Value::is_object) => Some(items),
        _ => None,
    };
    let Some(list) = list else {
        return Err(RelayError::UnexpectedShape(
            "La respuesta del webhook es JSON pero no contiene incidents[]".to_string(),
        ));
    };
    Ok(list
        .iter()
        .map(|item| match item {
            Value::Object(record) => Value::Object(normalize_incident(record.clone(), now)),
            other => other.clone(),
        })
        .collect())
}

/// Mutations assume success once the upstream answered 2xx, even without
/// a structured confirmation.
fn mutation_response(decoded: Decoded, raw: &str, payload: &OutboundPayload) -> Response {
    let incident_id = payload.incident_id().cloned().unwrap_or(Value::Null);
    let body = match decoded {
        Decoded::Json(v) => v,
        Decoded::TextualSuccess => json!({
            "status": "success",
            "message": "Operación aceptada",
            "action": payload.action(),
            "incident_id": incident_id,
            "timestamp": Utc::now().to_rfc3339(),
        }),
        Decoded::Undecodable => {
            tracing::warn!(action = %payload.action(), "upstream reply not JSON, assuming success");
            json!({
                "status": "success",
                "message": format!("Acción {} procesada (sin JSON)", payload.action()),
                "action": payload.action(),
                "incident_id": incident_id,
                "raw": snippet(raw.trim(), SNIPPET_CHARS),
                "timestamp": Utc::now().to_rfc3339(),
            })
        }
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn missing_fields(data: &Map<String, Value>, required: &[&str]) -> Option<RelayError> {
    let fields: Vec<String> = required
        .iter()
        .filter(|f| !is_present(data.get(**f)))
        .map(|f| f.to_string())
        .collect();
    if fields.is_empty() {
        None
    } else {
        Some(RelayError::MissingRequiredFields { fields })
    }
}

fn get_or_null(data: &Map<String, Value>, key: &str) -> Value {
    data.get(key).cloned().unwrap_or(Value::Null)
}

/// `/api/webhook-supervisor`: supervisor dashboard actions.
pub async fn supervisor_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    headers: axum::http::HeaderMap,
    body: Body,
) -> Response {
    let response = match method {
        Method::OPTIONS => StatusCode::OK.into_response(),
        Method::POST => match read_json_object(body, state.max_request_bytes).await {
            Ok(data) => {
                let meta = RequestMeta::from_parts(&headers, peer.map(|c| c.0));
                relay_supervisor(&state, data, &meta).await
            }
            Err(err) => error_response(&state, err, None),
        },
        _ => error_response(&state, RelayError::MethodNotAllowed { allowed: "POST" }, None),
    };
    with_cors(response, SUPERVISOR_METHODS)
}

async fn relay_supervisor(state: &AppState, data: Map<String, Value>, meta: &RequestMeta) -> Response {
    let action = action_name(&data);
    if let Some(err) = missing_fields(&data, &["action", "supervisor"]) {
        return error_response(state, err, action.as_deref());
    }
    let action = action.unwrap_or_default();

    let payload = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "action": action,
        "supervisor_email": get_or_null(&data, "supervisor"),
        "department": get_or_null(&data, "department"),
        "supervisor_name": get_or_null(&data, "supervisor_name"),
        "incident_id": get_or_null(&data, "incident_id"),
        "escalation_paused": get_or_null(&data, "escalation_paused"),
        "technician_email": get_or_null(&data, "technician"),
        "solution": get_or_null(&data, "solution"),
        "help_action": get_or_null(&data, "help_action"),
        "additional_data": get_or_null(&data, "data"),
        "user_agent": meta.user_agent,
        "ip_address": meta.ip_address,
    });

    let Some(url) = state.webhooks.supervisor.as_deref() else {
        if state.local_simulation {
            tracing::info!(action = %action, "simulating supervisor action locally");
            return (
                StatusCode::OK,
                Json(json!({
                    "status": "success",
                    "message": format!("Acción {} procesada en simulación local", action),
                    "action": action,
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
                .into_response();
        }
        let err = RelayError::Configuration(
            "Variable MAKE_WEBHOOK_SUPERVISOR no configurada".to_string(),
        );
        return error_response(state, err, Some(action.as_str()));
    };

    tracing::info!(action = %action, "forwarding supervisor action");
    let reply = match state.upstream.post_json(url, &payload).await {
        Ok(r) => r,
        Err(err) => return error_response(state, err, Some(action.as_str())),
    };
    let body = match decode_response(&reply.text) {
        Decoded::Json(v) => v,
        Decoded::TextualSuccess => json!({
            "status": "success",
            "message": format!("Acción {} procesada correctamente", action),
            "action": action,
            "timestamp": Utc::now().to_rfc3339(),
        }),
        Decoded::Undecodable => {
            tracing::warn!(action = %action, "supervisor reply not JSON, assuming success");
            json!({
                "status": "success",
                "message": format!("Acción {} procesada (sin JSON)", action),
                "action": action,
                "raw": snippet(reply.text.trim(), SNIPPET_CHARS),
                "timestamp": Utc::now().to_rfc3339(),
            })
        }
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// `/api/validate-pin`: supervisor PIN check.
pub async fn validate_pin_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    headers: axum::http::HeaderMap,
    body: Body,
) -> Response {
    let response = match method {
        Method::OPTIONS => StatusCode::OK.into_response(),
        Method::POST => match read_json_object(body, state.max_request_bytes).await {
            Ok(data) => {
                let meta = RequestMeta::from_parts(&headers, peer.map(|c| c.0));
                relay_validate_pin(&state, data, &meta).await
            }
            Err(err) => error_response(&state, err, None),
        },
        _ => error_response(&state, RelayError::MethodNotAllowed { allowed: "POST" }, None),
    };
    with_cors(response, SUPERVISOR_METHODS)
}

async fn relay_validate_pin(state: &AppState, data: Map<String, Value>, meta: &RequestMeta) -> Response {
    let action = action_name(&data);
    if let Some(err) = missing_fields(&data, &["action", "supervisor", "pin"]) {
        return error_response(state, err, action.as_deref());
    }
    let action = action.unwrap_or_default();
    let supervisor = get_or_null(&data, "supervisor");
    let pin = get_or_null(&data, "pin");

    let Some(url) = state.webhooks.validate_pin.as_deref() else {
        if state.local_simulation {
            return simulate_pin_check(state, &supervisor, &pin);
        }
        let err = RelayError::Configuration(
            "Variable MAKE_WEBHOOK_VALIDATE_PIN no configurada".to_string(),
        );
        return error_response(state, err, Some(action.as_str()));
    };

    let payload = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "action": action,
        "supervisor_email": supervisor,
        "pin": pin,
        "user_agent": meta.user_agent,
        "ip_address": meta.ip_address,
    });
    tracing::info!(action = %action, "forwarding PIN validation");
    let reply = match state.upstream.post_json(url, &payload).await {
        Ok(r) => r,
        Err(err) => return error_response(state, err, Some(action.as_str())),
    };
    match decode_response(&reply.text) {
        Decoded::Json(v) => (StatusCode::OK, Json(v)).into_response(),
        Decoded::TextualSuccess | Decoded::Undecodable => {
            let err = RelayError::UpstreamDecode {
                snippet: snippet(&reply.text, SNIPPET_CHARS),
            };
            error_response(state, err, Some(action.as_str()))
        }
    }
}

fn simulate_pin_check(state: &AppState, supervisor: &Value, pin: &Value) -> Response {
    let valid = crate::util::value_to_text(pin) == state.simulation_pin;
    tracing::info!(valid, "simulated PIN validation");
    let body = if valid {
        let email = supervisor.as_str().unwrap_or_default();
        json!({
            "status": "success",
            "message": "PIN válido",
            "supervisor": {
                "name": display_name_from_email(email),
                "email": supervisor,
                "department": "Supervisión",
            },
        })
    } else {
        json!({
            "status": "error",
            "message": "PIN incorrecto",
            "supervisor": null,
        })
    };
    (StatusCode::OK, Json(body)).into_response()
}

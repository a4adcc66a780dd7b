//! Error taxonomy for relayed actions.
//!
//! Every failure a handler can surface maps onto one `RelayError` variant,
//! which in turn knows its HTTP status and how to render the JSON error
//! envelope the dashboards expect (`status: "error"` plus correlation data).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Result alias used by the normalization and relay code.
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// The inbound request carried no usable `action`.
    #[error("Falta parámetro action")]
    MissingAction,

    /// One or more fields required by the action are absent or empty.
    #[error("Faltan campos obligatorios: {}", .fields.join(", "))]
    MissingRequiredFields { fields: Vec<String> },

    /// A field is present but has the wrong shape.
    #[error("Campo {field} inválido: {reason}")]
    InvalidField { field: String, reason: String },

    /// HTTP method the endpoint does not serve.
    #[error("Método no permitido (usar {allowed})")]
    MethodNotAllowed { allowed: &'static str },

    /// Request body over the configured limit.
    #[error("Cuerpo demasiado grande (límite {limit} bytes)")]
    PayloadTooLarge { limit: usize },

    /// Webhook URL unset or malformed; the upstream is never contacted.
    #[error("{0}")]
    Configuration(String),

    /// Network failure, timeout or non-2xx reply from the upstream webhook.
    #[error("Error comunicando con el webhook: {message}")]
    UpstreamTransport {
        status: Option<u16>,
        message: String,
        snippet: Option<String>,
    },

    /// The upstream replied 2xx but nothing usable could be decoded.
    #[error("Respuesta del webhook no interpretable")]
    UpstreamDecode { snippet: String },

    /// Decoded JSON that lacks the structure the action needs.
    #[error("{0}")]
    UnexpectedShape(String),

    /// Failure inside the relay itself, e.g. a request body that could not
    /// be buffered.
    #[error("Error interno del servidor")]
    Internal(String),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MissingAction
            | RelayError::MissingRequiredFields { .. }
            | RelayError::InvalidField { .. } => StatusCode::BAD_REQUEST,
            RelayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Configuration(_) | RelayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RelayError::UpstreamTransport { .. }
            | RelayError::UpstreamDecode { .. }
            | RelayError::UnexpectedShape(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Attach the triggering action and render the error envelope.
    pub fn into_envelope(self, action: Option<&str>, dev_mode: bool) -> ErrorEnvelope {
        let message = self.to_string();
        let mut envelope = ErrorEnvelope {
            status: "error",
            message,
            action: action.unwrap_or("unknown").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            required: None,
            upstream_status: None,
            body_snippet: None,
            error: None,
            http_status: self.status_code(),
        };
        match self {
            RelayError::MissingRequiredFields { fields } => envelope.required = Some(fields),
            RelayError::UpstreamTransport {
                status,
                message,
                snippet,
            } => {
                envelope.upstream_status = status;
                envelope.body_snippet = snippet;
                if dev_mode {
                    envelope.error = Some(message);
                }
            }
            RelayError::UpstreamDecode { snippet } => envelope.body_snippet = Some(snippet),
            RelayError::Configuration(detail) | RelayError::Internal(detail) if dev_mode => {
                envelope.error = Some(detail)
            }
            _ => {}
        }
        envelope
    }
}

/// Wire shape of every error reply.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub message: String,
    pub action: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_snippet: Option<String>,
    /// Diagnostic detail, only populated in development mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub http_status: StatusCode,
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> Response {
        (self.http_status, Json(self)).into_response()
    }
}

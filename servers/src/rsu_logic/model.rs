use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use lib_rsu::core::{RelayError, RelayStats};
use lib_rsu::geometry::GeometryError;
use lib_rsu::model::ControlDecision;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Direct reply to a producer on the WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    RsuResponse(Option<ControlDecision>),
    RsuError(ErrorBody),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ServerMessage {
    pub fn error(error: &str, details: impl ToString) -> Self {
        ServerMessage::RsuError(ErrorBody { error: error.to_string(), details: Some(details.to_string()) })
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"rsu_error","data":{"error":"encode_failed"}}"#.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub decision: Option<ControlDecision>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub subscribers: usize,
    pub network_loaded: bool,
    pub relay: RelayStats,
}

/// Errors a handler can return, mapped to a status code and JSON body.
#[derive(Debug)]
pub enum AppError {
    Relay(RelayError),
    Geometry(GeometryError),
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        AppError::Relay(e)
    }
}

impl From<GeometryError> for AppError {
    fn from(e: GeometryError) -> Self {
        AppError::Geometry(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Relay(RelayError::InvalidTelemetry(e)) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid_ev_message", "details": e.to_string() }),
            ),
            AppError::Relay(RelayError::AuditWrite(e)) => {
                log::error!("Audit write failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "audit_write_failed", "details": e.to_string() }),
                )
            }
            AppError::Geometry(GeometryError::NoSource) => {
                (StatusCode::NOT_FOUND, json!({ "error": "network_not_configured" }))
            }
            AppError::Geometry(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "network_unavailable", "details": e.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

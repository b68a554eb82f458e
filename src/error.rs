use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no couriers available")]
    NoCourierAvailable,

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Lost the race for a courier claim. Retried internally by the engine;
    /// only surfaces when something bypasses that loop.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("route service error: {0}")]
    ExternalService(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DispatchError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            DispatchError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            DispatchError::NoCourierAvailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no couriers available".to_string(),
            ),
            DispatchError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            DispatchError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            DispatchError::ExternalService(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            DispatchError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// API error type with HTTP status mapping
///
/// Every control endpoint returns `Result<Json<_>, ApiError>`; the error renders
/// as `{ "success": false, "error": { code, message, details? } }`.

use crate::error::SessionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Parameter or graph validation failures (422)
    #[error("validation failed: {message}")]
    ValidationFailed { message: String, errors: Vec<String> },

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ApiErrorDetail {
                    code: "NOT_FOUND",
                    message,
                    details: None,
                },
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ApiErrorDetail {
                    code: "BAD_REQUEST",
                    message,
                    details: None,
                },
            ),
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                ApiErrorDetail {
                    code: "CONFLICT",
                    message,
                    details: None,
                },
            ),
            ApiError::ValidationFailed { message, errors } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorDetail {
                    code: "VALIDATION_FAILED",
                    message,
                    details: Some(json!({ "errors": errors })),
                },
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorDetail {
                    code: "INTERNAL_ERROR",
                    message,
                    details: None,
                },
            ),
        };

        (status, Json(json!({ "success": false, "error": detail }))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::FlowNotFound(_) => ApiError::NotFound(err.to_string()),
            SessionError::AlreadyRunning(_) | SessionError::NotRunning(_) => ApiError::Conflict(err.to_string()),
            SessionError::InvalidParameters(errors) => ApiError::ValidationFailed {
                message: format!("{} invalid parameter(s)", errors.len()),
                errors,
            },
            SessionError::InvalidGraph { .. } => ApiError::ValidationFailed {
                message: err.to_string(),
                errors: Vec::new(),
            },
            SessionError::Storage(e) => {
                tracing::error!("❌ Storage error: {:#}", e);
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("❌ Request failed: {:#}", err);
        ApiError::Internal(err.to_string())
    }
}

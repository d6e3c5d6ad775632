//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping internal errors to appropriate HTTP status codes. Gate
//! validation errors get their own mapping so each rejection cause keeps a
//! distinct status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use compass_gate::GateError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 401 Unauthorized - credential or header validation failed.
    Unauthorized(String),
    /// 404 Not Found - resource does not exist.
    NotFound(String),
    /// 409 Conflict - state conflict (e.g., replayed nonce).
    Conflict(String),
    /// 422 Unprocessable Entity - valid syntax but semantic validation failure.
    UnprocessableEntity(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::UnprocessableEntity(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<compass_core::error::CompassError> for ApiError {
    fn from(err: compass_core::error::CompassError) -> Self {
        match &err {
            compass_core::error::CompassError::Config(msg) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<compass_exec::ExecError> for ApiError {
    fn from(err: compass_exec::ExecError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<compass_exec::WorkflowError> for ApiError {
    fn from(err: compass_exec::WorkflowError) -> Self {
        match &err {
            compass_exec::WorkflowError::NotFound(_) => ApiError::NotFound(err.to_string()),
            compass_exec::WorkflowError::InvalidPlan(_) => {
                ApiError::UnprocessableEntity(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

/// Gate rejections keep a distinct status per cause: bad credentials and
/// header problems are 401, a replayed nonce is 409, a malformed body is 422.
impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match &err {
            GateError::MissingHeader(_)
            | GateError::MalformedHeader { .. }
            | GateError::BadCredential
            | GateError::StaleTimestamp { .. } => ApiError::Unauthorized(err.to_string()),
            GateError::ReplayedNonce => ApiError::Conflict(err.to_string()),
            GateError::MalformedBody(_) => ApiError::UnprocessableEntity(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

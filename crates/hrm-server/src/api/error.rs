//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hrm_core::HrmError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    #[error("Bad Request: {message}")]
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// Failure reported by the recorder session. The status comes from
    /// [`HrmError::http_status_code`].
    #[error(transparent)]
    Recorder(#[from] HrmError),
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "not_connected",
    "message": "Recorder is not connected",
    "details": { "recoverable": true }
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "no_device_bound").
    #[schema(example = "not_connected")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Recorder is not connected")]
    pub message: String,

    /// Extra context for recorder errors: whether retrying can help and,
    /// for undecodable values, the expected and actual lengths.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Recorder(err) => StatusCode::from_u16(err.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    fn into_body(self) -> ErrorResponse {
        match self {
            Self::BadRequest {
                error_code,
                message,
            } => ErrorResponse {
                error: error_code,
                message,
                details: None,
            },
            Self::Recorder(err) => ErrorResponse {
                error: err.error_code().to_ascii_lowercase(),
                message: err.to_string(),
                details: Some(recorder_details(&err)),
            },
        }
    }
}

fn recorder_details(err: &HrmError) -> serde_json::Value {
    match err {
        HrmError::MalformedRecord {
            kind,
            expected,
            actual,
        } => serde_json::json!({
            "recoverable": err.is_recoverable(),
            "kind": kind,
            "expected": expected,
            "actual": actual,
        }),
        _ => serde_json::json!({ "recoverable": err.is_recoverable() }),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.into_body();

        if status.is_server_error() {
            tracing::error!(%status, error_code = %body.error, message = %body.message, "request failed");
        }

        (status, Json(body)).into_response()
    }
}

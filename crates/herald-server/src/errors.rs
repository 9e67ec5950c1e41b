//! Server errors and the JSON error body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use herald_pipeline::{SubmitError, ValidationError};
use serde_json::json;
use thiserror::Error;

/// Failure to start or run the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The metrics recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ServerError>;

/// An error rendered as `{"status": .., "error": {"code": .., "message": ..}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body_status: &'static str,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Event rejected by validation.
    pub fn rejected(err: &ValidationError) -> Self {
        let status = match err {
            ValidationError::Duplicate { .. } => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            body_status: "rejected",
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Resource not found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body_status: "error",
            code: "not_found",
            message: message.into(),
        }
    }

    /// Ledger unavailable or pipeline halted.
    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body_status: "error",
            code,
            message: message.into(),
        }
    }

    /// Ledger read failed.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body_status: "error",
            code: "internal",
            message: message.into(),
        }
    }

    /// HTTP status of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Rejected(e) => Self::rejected(&e),
            SubmitError::Fault(f) => Self::unavailable("ledger_unavailable", f.to_string()),
            e @ SubmitError::Halted { .. } => Self::unavailable("halted", e.to_string()),
            e @ SubmitError::UnknownEvent(_) => Self::not_found(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": self.body_status,
            "error": { "code": self.code, "message": self.message },
        });
        (self.status, Json(body)).into_response()
    }
}

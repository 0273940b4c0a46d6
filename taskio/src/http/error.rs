//! HTTP error surface.
//!
//! Handlers return `AppResult`; failures render as a JSON body with the
//! status mirrored in it. Infrastructure detail stays in the log and an
//! opaque message goes to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            status: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<taskio_core::Error> for AppError {
    fn from(err: taskio_core::Error) -> Self {
        use taskio_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Deserialization { context } => Self::bad_request(context),
            err @ Error::Upstream(_) => {
                tracing::error!(error = %err, "Upstream lookup failed");
                Self::bad_gateway("upstream service unavailable")
            }
            err @ (Error::Redis(_) | Error::Broker(_) | Error::Serialization(_)) => {
                tracing::error!(error = %err, "Notification backend error");
                Self::internal("notification backend unavailable")
            }
            err @ (Error::Config(_) | Error::Internal(_)) => {
                tracing::error!(error = %err, "Request failed");
                Self::internal("internal error")
            }
        }
    }
}

impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        tracing::error!(error = %err, "Metrics encoding failed");
        Self::internal("metrics encoding failed")
    }
}

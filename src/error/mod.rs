//! Error types for Coxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::http::{classify_transport_error, TransportFailure};

/// Primary error type for all Coxy operations.
#[derive(Error, Debug)]
pub enum CoxyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Authentication(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category used to pick the HTTP status for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    MalformedRequest,
    TransientUpstream,
    Upstream,
    Internal,
}

impl CoxyError {
    /// Create an upstream error carrying the upstream's status code.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::MalformedRequest(_) => ErrorCategory::MalformedRequest,
            Self::UpstreamUnavailable(_) => ErrorCategory::TransientUpstream,
            Self::Upstream { .. } => ErrorCategory::Upstream,
            Self::Configuration(_) | Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// HTTP status a client should see for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            other => match other.category() {
                ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
                ErrorCategory::MalformedRequest => StatusCode::BAD_REQUEST,
                ErrorCategory::TransientUpstream => StatusCode::BAD_GATEWAY,
                ErrorCategory::Upstream | ErrorCategory::Internal => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Whether the caller may reasonably retry. Coxy itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self.category() {
            ErrorCategory::TransientUpstream => true,
            ErrorCategory::Upstream => self.status_code().is_server_error(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CoxyError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::upstream(status.as_u16(), error.to_string());
        }
        match classify_transport_error(&error) {
            TransportFailure::Unavailable => Self::UpstreamUnavailable(error.to_string()),
            TransportFailure::Other => Self::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for CoxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CoxyError>;

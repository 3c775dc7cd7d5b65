use thiserror::Error;

use crate::error::CoxyError;
use crate::http::{classify_transport_error, TransportFailure};

/// Failures while obtaining or validating credentials.
///
/// `Clone` because one failed fetch is handed to every waiter sharing it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing API key")]
    MissingCredential,
    #[error("Invalid API key")]
    InvalidCredential,
    #[error("Expired or invalid grant")]
    ExpiredOrInvalidGrant,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Upstream service unavailable: {0}")]
    Unavailable(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("{message}")]
    Upstream { status: u16, message: String },
    #[error("Credential store error: {0}")]
    Store(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::Upstream {
                status: status.as_u16(),
                message: error.to_string(),
            };
        }
        if error.is_decode() {
            return Self::InvalidResponse(error.to_string());
        }
        match classify_transport_error(&error) {
            TransportFailure::Unavailable => Self::Unavailable(error.to_string()),
            TransportFailure::Other => Self::Network(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidResponse(error.to_string())
    }
}

impl From<AuthError> for CoxyError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredential
            | AuthError::InvalidCredential
            | AuthError::ExpiredOrInvalidGrant => CoxyError::Authentication(error.to_string()),
            AuthError::Unavailable(message) => CoxyError::UpstreamUnavailable(message),
            AuthError::Upstream { status, message } => CoxyError::Upstream { status, message },
            AuthError::InvalidResponse(_) | AuthError::Network(_) | AuthError::Store(_) => {
                CoxyError::Internal(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn credential_failures_become_401() {
        let err: CoxyError = AuthError::MissingCredential.into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "Missing API key");

        let err: CoxyError = AuthError::ExpiredOrInvalidGrant.into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unreachable_upstream_becomes_502() {
        let err: CoxyError = AuthError::Unavailable("connection refused".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn upstream_status_survives_conversion() {
        let err: CoxyError = AuthError::Upstream {
            status: 429,
            message: "rate limited".into(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}

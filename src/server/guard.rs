use std::fmt;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use super::AppState;
use crate::auth::{extract_credential, AuthError, CredentialKey};
use crate::error::CoxyError;

/// Caller credential that passed the guard, attached as a request extension.
#[derive(Clone)]
pub struct CallerCredential(String);

impl CallerCredential {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CallerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CallerCredential")
            .field(&CredentialKey::derive(&self.0).fingerprint())
            .finish()
    }
}

/// Reject requests whose `Authorization` header does not name a known caller.
pub async fn require_credential(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, CoxyError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let credential = extract_credential(header)
        .ok_or(AuthError::MissingCredential)?
        .to_string();

    let key = CredentialKey::derive(&credential);
    if !state.credentials.contains(&credential).await? {
        tracing::debug!(key = %key, "rejected unknown caller credential");
        return Err(AuthError::InvalidCredential.into());
    }
    tracing::debug!(key = %key, "caller credential accepted");

    request
        .extensions_mut()
        .insert(CallerCredential(credential));
    Ok(next.run(request).await)
}

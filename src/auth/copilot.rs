//! One-shot exchange of a caller credential for a short-lived Copilot token.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use super::error::AuthError;
use super::github_headers;

pub const DEFAULT_COPILOT_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";

/// Lifetime assumed when the token-meta response carries no expiry.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Short-lived upstream token plus the quota metadata that comes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopilotMeta {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub reset_time: Option<DateTime<Utc>>,
    pub chat_quota: Option<u64>,
    pub completions_quota: Option<u64>,
}

/// Fetches a fresh upstream token for a caller credential.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self, credential: &str) -> Result<CopilotMeta, AuthError>;
}

/// [`TokenFetcher`] backed by the GitHub token-meta endpoint.
///
/// # Example
/// ```no_run
/// use coxy::auth::{CopilotMetaClient, TokenFetcher};
///
/// # async fn run() -> Result<(), coxy::auth::AuthError> {
/// let client = CopilotMetaClient::new(reqwest::Client::new());
/// let meta = client.fetch("gho_example").await?;
/// println!("token valid until {}", meta.expires_at);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CopilotMetaClient {
    client: reqwest::Client,
    token_url: String,
}

impl CopilotMetaClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            token_url: DEFAULT_COPILOT_TOKEN_URL.to_string(),
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }
}

#[async_trait]
impl TokenFetcher for CopilotMetaClient {
    async fn fetch(&self, credential: &str) -> Result<CopilotMeta, AuthError> {
        let resp = self
            .client
            .get(&self.token_url)
            .headers(github_headers())
            .header("Authorization", format!("token {credential}"))
            .send()
            .await
            .map_err(|e| token_details_failure(e.into()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::ExpiredOrInvalidGrant);
        }
        if !status.is_success() {
            return Err(AuthError::Upstream {
                status: status.as_u16(),
                message: format!("Failed to get token details: status {status}"),
            });
        }

        let payload: TokenMetaResponse = resp
            .json()
            .await
            .map_err(|e| token_details_failure(e.into()))?;
        payload.into_meta(Utc::now())
    }
}

fn token_details_failure(error: AuthError) -> AuthError {
    match error {
        AuthError::Unavailable(m) => {
            AuthError::Unavailable(format!("Failed to get token details: {m}"))
        }
        AuthError::Network(m) => AuthError::Network(format!("Failed to get token details: {m}")),
        AuthError::InvalidResponse(m) => {
            AuthError::InvalidResponse(format!("Failed to get token details: {m}"))
        }
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct TokenMetaResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<serde_json::Value>,
    #[serde(default)]
    limited_user_quotas: Option<LimitedUserQuotas>,
    #[serde(default)]
    limited_user_reset_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LimitedUserQuotas {
    chat: Option<u64>,
    completions: Option<u64>,
}

impl TokenMetaResponse {
    fn into_meta(self, now: DateTime<Utc>) -> Result<CopilotMeta, AuthError> {
        if self.token.trim().is_empty() {
            return Err(AuthError::InvalidResponse(
                "Failed to get token details: empty token".to_string(),
            ));
        }
        let expires_at = match self.expires_at {
            None | Some(serde_json::Value::Null) => {
                now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)
            }
            Some(value) => parse_expires_at(&value)?,
        };
        let reset_time = self
            .limited_user_reset_date
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        let (chat_quota, completions_quota) = self
            .limited_user_quotas
            .map(|q| (q.chat, q.completions))
            .unwrap_or((None, None));
        Ok(CopilotMeta {
            token: self.token,
            expires_at,
            reset_time,
            chat_quota,
            completions_quota,
        })
    }
}

/// Accepts ISO-8601 strings, epoch seconds, or epoch milliseconds.
fn parse_expires_at(value: &serde_json::Value) -> Result<DateTime<Utc>, AuthError> {
    let invalid = || AuthError::InvalidResponse("Copilot token expires_at invalid".to_string());
    if let Some(num) = value.as_i64() {
        return from_epoch(num).ok_or_else(invalid);
    }
    if let Some(text) = value.as_str() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Ok(parsed.with_timezone(&Utc));
        }
        let num: i64 = text.parse().map_err(|_| invalid())?;
        return from_epoch(num).ok_or_else(invalid);
    }
    Err(invalid())
}

fn from_epoch(num: i64) -> Option<DateTime<Utc>> {
    if num > 10_000_000_000 {
        Utc.timestamp_millis_opt(num).single()
    } else {
        Utc.timestamp_opt(num, 0).single()
    }
}

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::context::{ForwarderConfig, ProxyRequestContext, CHAT_COMPLETIONS_PATH};
use crate::auth::{CredentialKey, TokenCache};
use crate::error::CoxyError;
use crate::http::{stream_body, stream_response, to_header_map};

/// Forwards caller requests to the Copilot API, injecting upstream tokens.
#[derive(Clone)]
pub struct RequestForwarder {
    client: reqwest::Client,
    tokens: TokenCache,
    config: Arc<ForwarderConfig>,
}

impl RequestForwarder {
    pub fn new(client: reqwest::Client, tokens: TokenCache, config: ForwarderConfig) -> Self {
        Self {
            client,
            tokens,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.tokens
    }

    /// Build the forwarding context for an inbound request.
    pub fn prepare(&self, request: Request) -> Result<ProxyRequestContext, CoxyError> {
        ProxyRequestContext::from_request(request, &self.config)
    }

    /// Forward a request and stream the upstream response back.
    ///
    /// Failures are turned into `{"message": ...}` responses here.
    pub async fn forward(&self, context: ProxyRequestContext, credential: &str) -> Response {
        let method = context.method.clone();
        let path = context.path.clone();
        match self.try_forward(context, credential).await {
            Ok(response) => response,
            Err(error) => {
                let key = CredentialKey::derive(credential);
                tracing::warn!(
                    method = %method,
                    path = %path,
                    key = %key,
                    status = error.status_code().as_u16(),
                    error = %error,
                    "proxy request failed"
                );
                error.into_response()
            }
        }
    }

    async fn try_forward(
        &self,
        context: ProxyRequestContext,
        credential: &str,
    ) -> Result<Response, CoxyError> {
        let ProxyRequestContext {
            method,
            upstream_path,
            target_url,
            mut headers,
            body,
            needs_upstream_auth,
            ..
        } = context;

        let body = match body {
            Some(body) if needs_upstream_auth => {
                let bytes = axum::body::to_bytes(body, self.config.max_body_bytes)
                    .await
                    .map_err(|e| CoxyError::MalformedRequest(format!("unreadable body: {e}")))?;
                if upstream_path.trim_end_matches('/') == CHAT_COMPLETIONS_PATH {
                    validate_chat_completion(&bytes)?;
                }
                headers.insert("content-length".to_string(), bytes.len().to_string());
                Some(reqwest::Body::from(bytes))
            }
            Some(body) => Some(stream_body(body)),
            None => None,
        };

        if needs_upstream_auth {
            let entry = self.tokens.resolve(credential).await?;
            headers.insert("authorization".to_string(), format!("Bearer {}", entry.token));
        }

        tracing::debug!(method = %method, url = %target_url, "forwarding upstream");
        let mut upstream = self
            .client
            .request(method, target_url)
            .headers(to_header_map(&headers));
        if let Some(body) = body {
            upstream = upstream.body(body);
        }
        let resp = upstream.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(CoxyError::upstream(
                status.as_u16(),
                upstream_error_message(status, &body),
            ));
        }

        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let mut response = Response::new(stream_response(resp));
        *response.status_mut() = status;
        if let Some(content_type) = content_type {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        Ok(response)
    }
}

impl std::fmt::Debug for RequestForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestForwarder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Chat completions need a JSON object with a non-empty `messages` array whose
/// entries each carry a `role` and `content`.
pub fn validate_chat_completion(body: &Bytes) -> Result<(), CoxyError> {
    let malformed = || CoxyError::MalformedRequest("invalid chat completion body".to_string());
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|_| malformed())?;
    let messages = value
        .get("messages")
        .and_then(serde_json::Value::as_array)
        .filter(|m| !m.is_empty())
        .ok_or_else(malformed)?;
    let well_formed = messages.iter().all(|message| {
        let role = message.get("role").and_then(serde_json::Value::as_str);
        let content = message.get("content");
        matches!(role, Some(r) if !r.is_empty())
            && matches!(content, Some(c) if !c.is_null() && c.as_str() != Some(""))
    });
    if well_formed {
        Ok(())
    } else {
        Err(malformed())
    }
}

/// Best-effort message from an upstream error body, else the status reason.
fn upstream_error_message(status: StatusCode, body: &[u8]) -> String {
    let from_json = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| value.pointer("/error/message").and_then(|m| m.as_str()))
                .or_else(|| value.get("error").and_then(|m| m.as_str()))
                .map(str::to_string)
        })
        .filter(|m| !m.is_empty());
    from_json.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Upstream error")
            .to_string()
    })
}

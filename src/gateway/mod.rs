//! Edge router splitting traffic between the backend API and the frontend UI.

pub mod health;

pub use health::{HealthReport, HealthStatus, ServiceHealth};

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::CoxyConfig;
use crate::error::Result;
use crate::http::{
    classify_transport_error, copy_end_to_end_headers, stream_body, stream_response,
    upstream_client, TransportFailure,
};
use crate::proxy::context::normalize_prefix;

pub const DEFAULT_API_PREFIX: &str = "/api";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn is_allowed_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::DELETE
            | Method::GET
            | Method::HEAD
            | Method::PATCH
            | Method::POST
            | Method::PUT
            | Method::OPTIONS
    )
}

/// Which internal service a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Backend,
    Frontend,
}

impl Upstream {
    pub fn name(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub backend_url: String,
    pub frontend_url: String,
    /// Inbound prefix routed to the backend.
    pub api_prefix: String,
    /// What `api_prefix` becomes on the way to the backend.
    pub rewrite_prefix: String,
    pub health_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(backend_url: impl Into<String>, frontend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            frontend_url: frontend_url.into(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            rewrite_prefix: DEFAULT_API_PREFIX.to_string(),
            health_timeout: Duration::from_millis(1500),
        }
    }

    pub fn from_config(config: &CoxyConfig) -> Self {
        Self {
            rewrite_prefix: config.api_prefix.clone(),
            health_timeout: config.health_timeout,
            ..Self::new(config.backend_url(), config.frontend_url())
        }
    }

    pub fn with_rewrite_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.rewrite_prefix = normalize_prefix(prefix.as_ref());
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Pick the upstream for `path` and build the full target URL.
    pub fn resolve(&self, path: &str, query: Option<&str>) -> (Upstream, String) {
        let (upstream, base, mut target) = match self.strip_api_prefix(path) {
            Some(rest) => {
                let rewritten = format!("{}{}", self.rewrite_prefix, rest);
                let rewritten = if rewritten.is_empty() {
                    "/".to_string()
                } else {
                    rewritten
                };
                (Upstream::Backend, &self.backend_url, rewritten)
            }
            None => (Upstream::Frontend, &self.frontend_url, path.to_string()),
        };
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }
        (upstream, format!("{}{}", base.trim_end_matches('/'), target))
    }

    fn strip_api_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.api_prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }
}

/// Gateway failures, rendered with the gateway's own JSON bodies.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Upstream service unavailable: {0}")]
    Unavailable(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        match classify_transport_error(&error) {
            TransportFailure::Unavailable => Self::Unavailable(error.to_string()),
            TransportFailure::Other => Self::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::Unavailable(_) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "Bad Gateway",
                    "message": "Upstream service unavailable"
                })),
            )
                .into_response(),
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(json!({ "error": "Method Not Allowed" })),
            )
                .into_response(),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal Server Error" })),
            )
                .into_response(),
        }
    }
}

/// Path-based reverse proxy in front of the backend and frontend services.
#[derive(Clone)]
pub struct GatewayRouter {
    client: reqwest::Client,
    config: Arc<GatewayConfig>,
}

impl GatewayRouter {
    pub fn new(client: reqwest::Client, config: GatewayConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .fallback(proxy)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    pub async fn health(&self) -> HealthReport {
        let targets = [
            (Upstream::Backend.name(), self.config.backend_url.as_str()),
            (Upstream::Frontend.name(), self.config.frontend_url.as_str()),
        ];
        health::check(&self.client, &targets, self.config.health_timeout).await
    }

    async fn forward(&self, request: Request) -> std::result::Result<Response, GatewayError> {
        let (parts, body) = request.into_parts();
        if !is_allowed_method(&parts.method) {
            return Err(GatewayError::MethodNotAllowed);
        }
        let (upstream, url) = self.config.resolve(parts.uri.path(), parts.uri.query());
        tracing::debug!(upstream = upstream.name(), method = %parts.method, url = %url, "routing request");

        let mut headers = reqwest::header::HeaderMap::new();
        copy_end_to_end_headers(&parts.headers, &mut headers);
        let mut outbound = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers);
        if !matches!(parts.method, Method::GET | Method::HEAD) {
            outbound = outbound.body(stream_body(body));
        }
        let resp = outbound.send().await.inspect_err(|error| {
            tracing::error!(upstream = upstream.name(), error = %error, "gateway upstream request failed");
        })?;

        let status = resp.status();
        let mut response_headers = axum::http::HeaderMap::new();
        copy_end_to_end_headers(resp.headers(), &mut response_headers);
        let mut response = Response::new(stream_response(resp));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

impl std::fmt::Debug for GatewayRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRouter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn healthz(State(gateway): State<GatewayRouter>) -> Json<HealthReport> {
    Json(gateway.health().await)
}

async fn proxy(State(gateway): State<GatewayRouter>, request: Request) -> Response {
    match gateway.forward(request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

/// Bind the gateway listener and serve until `shutdown` fires.
pub async fn run(config: &CoxyConfig, shutdown: CancellationToken) -> Result<()> {
    let gateway = GatewayRouter::new(
        upstream_client(CONNECT_TIMEOUT)?,
        GatewayConfig::from_config(config),
    );
    let listener = TcpListener::bind(config.listen_addr()).await?;
    tracing::info!(
        addr = %config.listen_addr(),
        backend = %gateway.config().backend_url,
        frontend = %gateway.config().frontend_url,
        "gateway listening"
    );
    crate::server::serve(listener, gateway.router(), shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> GatewayConfig {
        GatewayConfig::new("http://backend:3020", "http://frontend:3010/")
    }

    #[test]
    fn api_paths_go_to_backend() {
        assert_eq!(
            config().resolve("/api/chat/completions", None),
            (
                Upstream::Backend,
                "http://backend:3020/api/chat/completions".to_string()
            )
        );
        assert_eq!(
            config().resolve("/api", Some("x=1")),
            (Upstream::Backend, "http://backend:3020/api?x=1".to_string())
        );
    }

    #[test]
    fn other_paths_go_to_frontend() {
        assert_eq!(
            config().resolve("/api-keys", None),
            (Upstream::Frontend, "http://frontend:3010/api-keys".to_string())
        );
        assert_eq!(
            config().resolve("/", None),
            (Upstream::Frontend, "http://frontend:3010/".to_string())
        );
    }

    #[test]
    fn prefix_is_rewritten() {
        let config = config().with_rewrite_prefix("v1");
        assert_eq!(
            config.resolve("/api/models", None).1,
            "http://backend:3020/v1/models"
        );

        let config = self::config().with_rewrite_prefix("");
        assert_eq!(config.resolve("/api", None).1, "http://backend:3020/");
    }

    #[test]
    fn gateway_errors_have_fixed_bodies() {
        let response = GatewayError::Unavailable("refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = GatewayError::Internal("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

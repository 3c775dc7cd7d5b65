use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::Request;
use axum::http::Method;
use reqwest::Url;

use crate::error::CoxyError;
use crate::http::{flatten_headers, is_hop_by_hop};

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.githubcopilot.com";
pub const DEFAULT_SERVICE_PREFIX: &str = "/api";
pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Inbound headers that never reach the upstream.
///
/// `accept-encoding` is dropped so the upstream answers uncompressed; only
/// `content-type` is relayed back, so an encoded body would be unreadable.
const DROPPED_HEADERS: &[&str] = &["content-length", "accept-encoding"];

/// Where and how requests are forwarded.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub upstream_url: String,
    /// Prefix stripped from inbound paths, e.g. `/api`.
    pub service_prefix: String,
    /// Upstream paths that get a resolved `Authorization: Bearer` token.
    pub authorized_paths: Vec<String>,
    pub max_body_bytes: usize,
    /// Static headers laid over every forwarded request.
    pub upstream_headers: BTreeMap<String, String>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            service_prefix: DEFAULT_SERVICE_PREFIX.to_string(),
            authorized_paths: vec![CHAT_COMPLETIONS_PATH.to_string()],
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            upstream_headers: copilot_headers(),
        }
    }
}

impl ForwarderConfig {
    pub fn with_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = url.into();
        self
    }

    pub fn with_service_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.service_prefix = normalize_prefix(prefix.as_ref());
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Strip the service prefix, leaving the path the upstream sees.
    pub fn upstream_path<'a>(&self, inbound: &'a str) -> &'a str {
        let prefix = self.service_prefix.as_str();
        if prefix.is_empty() || prefix == "/" {
            return inbound;
        }
        match inbound.strip_prefix(prefix) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => inbound,
        }
    }

    pub fn requires_upstream_auth(&self, upstream_path: &str) -> bool {
        let path = upstream_path.trim_end_matches('/');
        self.authorized_paths
            .iter()
            .any(|p| p.trim_end_matches('/') == path)
    }
}

/// Headers the Copilot API expects from a chat integration.
pub fn copilot_headers() -> BTreeMap<String, String> {
    [
        ("editor-version", "CopilotProxy/0.1.0"),
        ("copilot-integration-id", "vscode-chat"),
        ("copilot-vision-request", "true"),
        ("user-agent", "CopilotProxy"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// `api`, `/api`, `/api/` all become `/api`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Everything the forwarder needs to know about one inbound request.
#[derive(Debug)]
pub struct ProxyRequestContext {
    pub method: Method,
    /// Inbound path, kept for logging.
    pub path: String,
    pub upstream_path: String,
    pub target_url: Url,
    pub headers: BTreeMap<String, String>,
    /// `None` for GET and HEAD.
    pub body: Option<Body>,
    pub needs_upstream_auth: bool,
}

impl ProxyRequestContext {
    pub fn from_request(request: Request, config: &ForwarderConfig) -> Result<Self, CoxyError> {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();
        let upstream_path = config.upstream_path(&path).to_string();

        let mut target = format!("{}{}", config.upstream_url.trim_end_matches('/'), upstream_path);
        if let Some(query) = parts.uri.query() {
            target.push('?');
            target.push_str(query);
        }
        let target_url = Url::parse(&target)
            .map_err(|e| CoxyError::Configuration(format!("Invalid upstream URL {target}: {e}")))?;

        let mut headers = flatten_headers(&parts.headers);
        headers.retain(|name, _| {
            !is_hop_by_hop(name) && !DROPPED_HEADERS.iter().any(|d| name.eq_ignore_ascii_case(d))
        });
        for (name, value) in &config.upstream_headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        let body = match parts.method {
            Method::GET | Method::HEAD => None,
            _ => Some(body),
        };

        Ok(Self {
            needs_upstream_auth: config.requires_upstream_auth(&upstream_path),
            method: parts.method,
            path,
            upstream_path,
            target_url,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(method: Method, uri: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "localhost:3020")
            .header("content-length", "12")
            .header("connection", "keep-alive")
            .header("accept-encoding", "gzip")
            .header("x-foo", "a")
            .header("x-foo", "b")
            .header("user-agent", "curl/8")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn strips_prefix_and_keeps_query() {
        let config = ForwarderConfig::default();
        let ctx =
            ProxyRequestContext::from_request(request(Method::GET, "/api/models?limit=10"), &config)
                .unwrap();

        assert_eq!(
            ctx.target_url.as_str(),
            "https://api.githubcopilot.com/models?limit=10"
        );
        assert_eq!(ctx.upstream_path, "/models");
        assert!(!ctx.needs_upstream_auth);
        assert!(ctx.body.is_none());
    }

    #[test]
    fn chat_completions_requires_upstream_auth() {
        let config = ForwarderConfig::default();
        let ctx = ProxyRequestContext::from_request(
            request(Method::POST, "/api/chat/completions"),
            &config,
        )
        .unwrap();

        assert!(ctx.needs_upstream_auth);
        assert!(ctx.body.is_some());
    }

    #[test]
    fn headers_are_flattened_filtered_and_overlaid() {
        let config = ForwarderConfig::default();
        let ctx = ProxyRequestContext::from_request(request(Method::POST, "/api/x"), &config)
            .unwrap();

        assert_eq!(ctx.headers.get("x-foo").map(String::as_str), Some("a,b"));
        assert_eq!(
            ctx.headers.get("user-agent").map(String::as_str),
            Some("CopilotProxy")
        );
        assert_eq!(
            ctx.headers.get("copilot-integration-id").map(String::as_str),
            Some("vscode-chat")
        );
        for dropped in ["host", "content-length", "connection", "accept-encoding"] {
            assert!(!ctx.headers.contains_key(dropped), "{dropped} should be dropped");
        }
    }

    #[test]
    fn prefix_matching_respects_segment_boundaries() {
        let config = ForwarderConfig::default();
        assert_eq!(config.upstream_path("/api"), "/");
        assert_eq!(config.upstream_path("/api/models"), "/models");
        assert_eq!(config.upstream_path("/apis/models"), "/apis/models");
    }

    #[test]
    fn prefixes_are_normalized() {
        assert_eq!(normalize_prefix("api"), "/api");
        assert_eq!(normalize_prefix("/api/"), "/api");
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
    }
}

//! Process configuration read from the environment (and `.env`).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::proxy::context::{normalize_prefix, DEFAULT_MAX_BODY_BYTES, DEFAULT_UPSTREAM_URL};

/// Settings shared by the gateway and backend processes.
#[derive(Clone, PartialEq, Eq)]
pub struct CoxyConfig {
    pub host: String,
    pub port: u16,
    pub backend_host: String,
    pub backend_port: u16,
    pub frontend_host: String,
    pub frontend_port: u16,
    /// Normalized backend route prefix, e.g. `/api`.
    pub api_prefix: String,
    pub copilot_api_url: String,
    pub token_skew: Duration,
    pub device_flow_poll: Duration,
    pub health_timeout: Duration,
    pub max_body_bytes: usize,
    /// Credentials accepted by the backend before anyone logs in.
    pub api_keys: Vec<String>,
}

impl fmt::Debug for CoxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend_host", &self.backend_host)
            .field("backend_port", &self.backend_port)
            .field("frontend_host", &self.frontend_host)
            .field("frontend_port", &self.frontend_port)
            .field("api_prefix", &self.api_prefix)
            .field("copilot_api_url", &self.copilot_api_url)
            .field("token_skew", &self.token_skew)
            .field("device_flow_poll", &self.device_flow_poll)
            .field("health_timeout", &self.health_timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("api_keys", &format_args!("[{} redacted]", self.api_keys.len()))
            .finish()
    }
}

impl Default for CoxyConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            backend_host: "localhost".to_string(),
            backend_port: 3020,
            frontend_host: "localhost".to_string(),
            frontend_port: 3010,
            api_prefix: "/api".to_string(),
            copilot_api_url: DEFAULT_UPSTREAM_URL.to_string(),
            token_skew: Duration::from_secs(60),
            device_flow_poll: Duration::from_millis(5500),
            health_timeout: Duration::from_millis(1500),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            api_keys: Vec::new(),
        }
    }
}

impl CoxyConfig {
    /// Load from process environment variables, reading `.env` first if present.
    pub fn from_env() -> Self {
        if let Err(error) = dotenvy::dotenv() {
            tracing::debug!(error = %error, "no .env loaded");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unset or unparsable values
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        let api_keys = lookup("COXY_API_KEYS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host: text("HOST", defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port),
            backend_host: text("BACKEND_HOST", defaults.backend_host),
            backend_port: parse_or(&lookup, "BACKEND_PORT", defaults.backend_port),
            frontend_host: text("FRONTEND_HOST", defaults.frontend_host),
            frontend_port: parse_or(&lookup, "FRONTEND_PORT", defaults.frontend_port),
            api_prefix: lookup("API_PREFIX")
                .map(|p| normalize_prefix(&p))
                .unwrap_or(defaults.api_prefix),
            copilot_api_url: text("COPILOT_API_URL", defaults.copilot_api_url),
            token_skew: Duration::from_secs(parse_or(&lookup, "TOKEN_SKEW_SECS", 60)),
            device_flow_poll: Duration::from_millis(parse_or(&lookup, "DEVICE_FLOW_POLL_MS", 5500)),
            health_timeout: Duration::from_millis(parse_or(&lookup, "HEALTH_TIMEOUT_MS", 1500)),
            max_body_bytes: parse_or(&lookup, "MAX_BODY_BYTES", defaults.max_body_bytes),
            api_keys,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.backend_host, self.backend_port)
    }

    pub fn backend_url(&self) -> String {
        format!("http://{}", self.backend_addr())
    }

    pub fn frontend_url(&self) -> String {
        format!("http://{}:{}", self.frontend_host, self.frontend_port)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable config value");
                default
            }
        },
    }
}

//! Shared test helpers: a scripted token fetcher and small network utilities.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use coxy::auth::{
    AuthError, CopilotMeta, DeviceFlowClient, InMemoryCredentialStore, TokenCache, TokenFetcher,
};
use coxy::proxy::{ForwarderConfig, RequestForwarder};
use coxy::server::AppState;

pub const CALLER_KEY: &str = "caller-key";

/// A fetcher that returns queued results, then a default token.
pub struct MockFetcher {
    calls: AtomicUsize,
    queued: Mutex<VecDeque<Result<CopilotMeta, AuthError>>>,
    delay: Duration,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            queued: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
        }
    }

    /// Hold every fetch for `delay` so concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn queue_token(&self, token: &str, ttl: chrono::Duration) {
        self.queued.lock().unwrap().push_back(Ok(meta(token, ttl)));
    }

    pub fn queue_error(&self, error: AuthError) {
        self.queued.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenFetcher for MockFetcher {
    async fn fetch(&self, _credential: &str) -> Result<CopilotMeta, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.queued.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(meta("copilot-token", chrono::Duration::hours(1))))
    }
}

pub fn meta(token: &str, ttl: chrono::Duration) -> CopilotMeta {
    CopilotMeta {
        token: token.to_string(),
        expires_at: Utc::now() + ttl,
        reset_time: None,
        chat_quota: None,
        completions_quota: None,
    }
}

/// Backend state pointing every upstream at `upstream_url`.
pub fn backend_state(upstream_url: &str, fetcher: Arc<MockFetcher>) -> (AppState, Arc<InMemoryCredentialStore>) {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let tokens = TokenCache::new(fetcher);
    let forwarder = RequestForwarder::new(
        client.clone(),
        tokens,
        ForwarderConfig::default().with_upstream_url(upstream_url),
    );
    let credentials = Arc::new(InMemoryCredentialStore::with_credentials([CALLER_KEY]));
    let device_flow = DeviceFlowClient::new(client)
        .with_device_code_url(format!("{upstream_url}/login/device/code"))
        .with_access_token_url(format!("{upstream_url}/login/oauth/access_token"))
        .with_poll_interval(Duration::from_millis(20));
    let state = AppState::new(forwarder, credentials.clone(), device_flow);
    (state, credentials)
}

/// URL of a local port with nothing listening on it.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

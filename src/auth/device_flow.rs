//! GitHub OAuth device flow as a cancellable stream of events.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_stream::stream;
use chrono::Utc;
use futures::Stream;
use serde::Deserialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::device_code::{DeviceFlowEvent, DeviceFlowSession};
use super::error::AuthError;
use super::github_headers;

pub const DEFAULT_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
pub const DEFAULT_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
pub const DEFAULT_ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5500);

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Result of a single poll of the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFlowPoll {
    Pending,
    Authorized { access_token: String },
    Expired,
    /// The provider answered with an error other than the ones above.
    Rejected { message: String },
}

/// One-shot stop flag shared between a flow and whoever may cancel it.
///
/// The first `trigger` wins; later calls are no-ops.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the flow. Returns `true` only for the call that actually stopped it.
    pub fn trigger(&self) -> bool {
        let first = self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.token.cancel();
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Resolves once the signal has been triggered.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }
}

/// Client for the GitHub device-authorization endpoints.
///
/// # Example
/// ```no_run
/// use futures::StreamExt;
/// use coxy::auth::DeviceFlowClient;
///
/// # async fn run() {
/// let mut flow = DeviceFlowClient::new(reqwest::Client::new()).start();
/// while let Some(event) = flow.next().await {
///     println!("{}: {}", event.kind(), event.message());
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeviceFlowClient {
    client: reqwest::Client,
    client_id: String,
    device_code_url: String,
    access_token_url: String,
    poll_interval: Duration,
}

impl DeviceFlowClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            device_code_url: DEFAULT_DEVICE_CODE_URL.to_string(),
            access_token_url: DEFAULT_ACCESS_TOKEN_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_device_code_url(mut self, url: impl Into<String>) -> Self {
        self.device_code_url = url.into();
        self
    }

    pub fn with_access_token_url(mut self, url: impl Into<String>) -> Self {
        self.access_token_url = url.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Request a device code and user code.
    pub async fn initiate(&self) -> Result<DeviceFlowSession, AuthError> {
        let resp = self
            .client
            .post(&self.device_code_url)
            .headers(github_headers())
            .form(&[("client_id", self.client_id.as_str()), ("scope", "read:user")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::Upstream {
                status: resp.status().as_u16(),
                message: format!("Device code request failed with status {}", resp.status()),
            });
        }
        let payload: DeviceCodeResponse = resp.json().await?;
        Ok(DeviceFlowSession {
            device_code: payload.device_code,
            user_code: payload.user_code,
            verification_uri: payload.verification_uri,
            expires_at: Utc::now() + chrono::Duration::seconds(payload.expires_in as i64),
            poll_interval: Duration::from_secs(payload.interval),
        })
    }

    /// Ask the token endpoint once whether the user has authorized the session.
    pub async fn poll_once(&self, session: &DeviceFlowSession) -> Result<DeviceFlowPoll, AuthError> {
        let resp = self
            .client
            .post(&self.access_token_url)
            .headers(github_headers())
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("device_code", session.device_code.as_str()),
                ("grant_type", DEVICE_GRANT_TYPE),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::Upstream {
                status: resp.status().as_u16(),
                message: format!("Device token request failed with status {}", resp.status()),
            });
        }
        let payload: AccessTokenResponse = resp.json().await?;
        Ok(payload.into_poll())
    }

    /// Start a new flow. Nothing happens until the returned stream is polled.
    pub fn start(&self) -> DeviceFlow {
        let stop = StopSignal::new();
        let events = run_flow(self.clone(), stop.clone());
        DeviceFlow {
            events: Box::pin(events),
            stop,
        }
    }
}

/// Ordered, single-consumer stream of [`DeviceFlowEvent`]s.
///
/// Ends after exactly one terminal event, or silently after [`cancel`](Self::cancel).
/// Dropping it stops polling.
pub struct DeviceFlow {
    events: Pin<Box<dyn Stream<Item = DeviceFlowEvent> + Send>>,
    stop: StopSignal,
}

impl DeviceFlow {
    /// Stop the flow. Idempotent; returns `true` for the call that stopped it.
    pub fn cancel(&self) -> bool {
        let stopped = self.stop.trigger();
        if stopped {
            tracing::debug!("device flow cancelled");
        }
        stopped
    }

    /// Handle that can cancel the flow from another task.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }
}

impl Stream for DeviceFlow {
    type Item = DeviceFlowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl Drop for DeviceFlow {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

impl std::fmt::Debug for DeviceFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceFlow")
            .field("stopped", &self.stop.is_stopped())
            .finish_non_exhaustive()
    }
}

fn run_flow(client: DeviceFlowClient, stop: StopSignal) -> impl Stream<Item = DeviceFlowEvent> {
    stream! {
        let initiated = tokio::select! {
            biased;
            _ = stop.stopped() => return,
            result = client.initiate() => result,
        };
        let session = match initiated {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!(error = %error, "device flow initiation failed");
                if stop.trigger() {
                    yield DeviceFlowEvent::error(format!("Failed to initiate device flow: {error}"));
                }
                return;
            }
        };
        if stop.is_stopped() {
            return;
        }
        tracing::info!(user_code = %session.user_code, "device flow initiated");
        yield DeviceFlowEvent::initiated(&session);

        let period = client.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => return,
                _ = ticker.tick() => {}
            }

            if session.is_expired() {
                if stop.trigger() {
                    yield DeviceFlowEvent::expired();
                }
                return;
            }

            let polled = tokio::select! {
                biased;
                _ = stop.stopped() => return,
                result = client.poll_once(&session) => result,
            };
            let event = match polled {
                Ok(DeviceFlowPoll::Pending) => DeviceFlowEvent::pending(),
                Ok(DeviceFlowPoll::Authorized { access_token }) => {
                    DeviceFlowEvent::success(access_token)
                }
                Ok(DeviceFlowPoll::Expired) => DeviceFlowEvent::expired(),
                Ok(DeviceFlowPoll::Rejected { message }) => DeviceFlowEvent::error(message),
                Err(error) => DeviceFlowEvent::error(format!(
                    "Failed to poll device authorization: {error}"
                )),
            };

            if event.is_terminal() {
                tracing::info!(outcome = event.kind(), "device flow finished");
                if stop.trigger() {
                    yield event;
                }
                return;
            }
            if stop.is_stopped() {
                return;
            }
            yield event;
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default)]
    interval: u64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl AccessTokenResponse {
    fn into_poll(self) -> DeviceFlowPoll {
        match self.error.as_deref() {
            Some("authorization_pending") => DeviceFlowPoll::Pending,
            Some("expired_token") => DeviceFlowPoll::Expired,
            Some(error) => {
                let detail = self
                    .error_description
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| error.to_string());
                DeviceFlowPoll::Rejected {
                    message: format!("Error: {detail}"),
                }
            }
            None => match self.access_token.filter(|t| !t.is_empty()) {
                Some(access_token) => DeviceFlowPoll::Authorized { access_token },
                None => DeviceFlowPoll::Rejected {
                    message: "Error: response carried neither a token nor an error".to_string(),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn response(
        access_token: Option<&str>,
        error: Option<&str>,
        description: Option<&str>,
    ) -> AccessTokenResponse {
        AccessTokenResponse {
            access_token: access_token.map(str::to_string),
            error: error.map(str::to_string),
            error_description: description.map(str::to_string),
        }
    }

    #[test]
    fn pending_and_expired_errors_are_recognized() {
        assert_eq!(
            response(None, Some("authorization_pending"), None).into_poll(),
            DeviceFlowPoll::Pending
        );
        assert_eq!(
            response(None, Some("expired_token"), None).into_poll(),
            DeviceFlowPoll::Expired
        );
    }

    #[test]
    fn other_errors_prefer_description() {
        assert_eq!(
            response(None, Some("access_denied"), Some("The user denied access")).into_poll(),
            DeviceFlowPoll::Rejected {
                message: "Error: The user denied access".into()
            }
        );
        assert_eq!(
            response(None, Some("slow_down"), None).into_poll(),
            DeviceFlowPoll::Rejected {
                message: "Error: slow_down".into()
            }
        );
    }

    #[test]
    fn access_token_means_authorized() {
        assert_eq!(
            response(Some("gho_123"), None, None).into_poll(),
            DeviceFlowPoll::Authorized {
                access_token: "gho_123".into()
            }
        );
    }

    #[test]
    fn stop_signal_triggers_once() {
        let stop = StopSignal::new();
        assert!(!stop.is_stopped());
        assert!(stop.trigger());
        assert!(!stop.trigger());
        assert!(stop.is_stopped());
    }

    #[tokio::test]
    async fn stopped_resolves_after_trigger_from_clone() {
        let stop = StopSignal::new();
        let handle = stop.clone();
        let waiter = tokio::spawn(async move { handle.stopped().await });
        stop.trigger();
        waiter.await.unwrap();
    }
}

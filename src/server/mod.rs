//! Backend HTTP service: guarded proxy routes and the device-flow event stream.

mod guard;
mod handlers;

pub use guard::{require_credential, CallerCredential};

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::auth::{
    CopilotMetaClient, CredentialStore, DeviceFlowClient, InMemoryCredentialStore, TokenCache,
};
use crate::config::CoxyConfig;
use crate::error::{CoxyError, Result};
use crate::http::upstream_client;
use crate::proxy::{ForwarderConfig, RequestForwarder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for backend handlers.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: RequestForwarder,
    pub credentials: Arc<dyn CredentialStore>,
    pub device_flow: DeviceFlowClient,
}

impl AppState {
    pub fn new(
        forwarder: RequestForwarder,
        credentials: Arc<dyn CredentialStore>,
        device_flow: DeviceFlowClient,
    ) -> Self {
        Self {
            forwarder,
            credentials,
            device_flow,
        }
    }

    /// Wire up the production collaborators from configuration.
    pub fn from_config(config: &CoxyConfig) -> Result<Self> {
        let client = upstream_client(CONNECT_TIMEOUT)?;
        let skew = chrono::Duration::from_std(config.token_skew)
            .map_err(|e| CoxyError::Configuration(format!("token skew out of range: {e}")))?;
        let tokens = TokenCache::new(Arc::new(CopilotMetaClient::new(client.clone())))
            .with_skew(skew);
        let forwarder = RequestForwarder::new(
            client.clone(),
            tokens,
            ForwarderConfig::default()
                .with_upstream_url(config.copilot_api_url.clone())
                .with_service_prefix(&config.api_prefix)
                .with_max_body_bytes(config.max_body_bytes),
        );
        let credentials = Arc::new(InMemoryCredentialStore::with_credentials(&config.api_keys));
        let device_flow =
            DeviceFlowClient::new(client).with_poll_interval(config.device_flow_poll);
        Ok(Self::new(forwarder, credentials, device_flow))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("forwarder", &self.forwarder)
            .field("device_flow", &self.device_flow)
            .finish_non_exhaustive()
    }
}

/// Build the backend router. Routes live under the forwarder's service prefix.
pub fn router(state: AppState) -> Router {
    let prefix = state.forwarder.config().service_prefix.clone();

    let guarded = Router::new()
        .route(&format!("{prefix}/chat/completions"), post(handlers::proxy))
        .route(&format!("{prefix}/models"), get(handlers::proxy))
        .route(&format!("{prefix}/{{*path}}"), any(handlers::proxy))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guard::require_credential,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route(
            &format!("{prefix}/api-keys/github-auth/device-flow"),
            get(handlers::device_flow_events),
        )
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the backend listener and serve until `shutdown` fires.
pub async fn run(config: &CoxyConfig, shutdown: CancellationToken) -> Result<()> {
    let state = AppState::from_config(config)?;
    let listener = TcpListener::bind(config.backend_addr()).await?;
    tracing::info!(
        addr = %config.backend_addr(),
        prefix = %config.api_prefix,
        upstream = %config.copilot_api_url,
        "backend listening"
    );
    serve(listener, router(state), shutdown).await
}

/// Serve a router with graceful shutdown.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

/// Token cancelled on Ctrl-C or SIGTERM.
pub fn shutdown_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        trigger.cancel();
    });
    token
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures::{Stream, StreamExt};

use super::guard::CallerCredential;
use super::AppState;
use crate::auth::{CredentialStore, DeviceFlowEvent};

/// Liveness target for the gateway health probe.
pub(super) async fn root() -> StatusCode {
    StatusCode::OK
}

pub(super) async fn proxy(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerCredential>,
    request: Request,
) -> Response {
    match state.forwarder.prepare(request) {
        Ok(context) => state.forwarder.forward(context, caller.as_str()).await,
        Err(error) => error.into_response(),
    }
}

/// Runs a device flow and relays its events as Server-Sent Events.
///
/// A successful login registers the new access token as a caller credential.
pub(super) async fn device_flow_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let flow = state.device_flow.start();
    let credentials = Arc::clone(&state.credentials);
    let events = flow.then(move |event| {
        let credentials = Arc::clone(&credentials);
        async move {
            register_on_success(credentials.as_ref(), &event).await;
            Event::default().event(event.kind()).json_data(&event)
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn register_on_success(credentials: &dyn CredentialStore, event: &DeviceFlowEvent) {
    if let DeviceFlowEvent::Success { access_token, .. } = event {
        if let Err(error) = credentials.insert(access_token.clone()).await {
            tracing::warn!(error = %error, "failed to register device-flow credential");
        }
    }
}

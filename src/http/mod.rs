//! Shared HTTP client, header, and body-streaming utilities.

use std::collections::BTreeMap;
use std::error::Error as _;
use std::io::ErrorKind;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::CoxyError;

/// Chunks buffered between the inbound body and the upstream request.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Headers that describe a single hop and must not be relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Outcome of classifying a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The upstream could not be reached (refused, reset, DNS, connect timeout).
    Unavailable,
    /// Anything else.
    Other,
}

/// Build an upstream client. Only the connect phase is bounded so that long
/// streamed completions are never cut off. Redirects are relayed, not followed.
pub fn upstream_client(connect_timeout: Duration) -> Result<reqwest::Client, CoxyError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| CoxyError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Whether a header is hop-by-hop (or `host`) and must be dropped when relaying.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Flatten a header map into single-valued entries, joining repeats with `,`.
///
/// Values that are not visible ASCII are skipped.
pub fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

/// Convert flattened headers back into a `HeaderMap`, skipping invalid entries.
pub fn to_header_map(flat: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(flat.len());
    for (name, value) in flat {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Copy relayable headers from one map to another.
pub fn copy_end_to_end_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !is_hop_by_hop(name.as_str()) {
            to.append(name.clone(), value.clone());
        }
    }
}

/// Turn an inbound body into a streamed upstream body.
///
/// Chunks travel through a bounded channel, so a slow upstream slows down
/// reading from the client instead of growing a buffer.
pub fn stream_body(body: Body) -> reqwest::Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(BODY_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut chunks = body.into_data_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(std::io::Error::other);
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });
    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}

/// Pipe an upstream response body to the caller without buffering it.
pub fn stream_response(response: reqwest::Response) -> Body {
    Body::from_stream(response.bytes_stream())
}

/// Decide whether a reqwest failure means the upstream is unreachable.
///
/// Connect timeouts count; a request that timed out after connecting does not.
pub fn classify_transport_error(error: &reqwest::Error) -> TransportFailure {
    if error.is_connect() {
        return TransportFailure::Unavailable;
    }
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
            ) {
                return TransportFailure::Unavailable;
            }
        }
        source = cause.source();
    }
    TransportFailure::Other
}

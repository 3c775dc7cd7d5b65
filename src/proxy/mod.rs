//! Streaming reverse proxy to the Copilot chat API.

pub mod context;
pub mod forwarder;

pub use context::{copilot_headers, ForwarderConfig, ProxyRequestContext};
pub use forwarder::{validate_chat_completion, RequestForwarder};

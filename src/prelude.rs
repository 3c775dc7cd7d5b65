//! Convenience re-exports for common use.

pub use crate::auth::{
    AuthError, CopilotMeta, CopilotMetaClient, CredentialStore, DeviceFlow, DeviceFlowClient,
    DeviceFlowEvent, InMemoryCredentialStore, TokenCache, TokenEntry, TokenFetcher,
};
pub use crate::config::CoxyConfig;
pub use crate::error::{CoxyError, Result};
pub use crate::gateway::{GatewayConfig, GatewayRouter, HealthReport};
pub use crate::proxy::{ForwarderConfig, RequestForwarder};
pub use crate::server::AppState;

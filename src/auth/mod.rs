//! Device-flow login, upstream token exchange and caching, caller credentials.

pub mod copilot;
pub mod credentials;
pub mod device_code;
pub mod device_flow;
pub mod error;
pub mod token_cache;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};

pub use copilot::{CopilotMeta, CopilotMetaClient, TokenFetcher};
pub use credentials::{
    extract_credential, CredentialKey, CredentialStore, InMemoryCredentialStore,
};
pub use device_code::{DeviceFlowEvent, DeviceFlowSession};
pub use device_flow::{DeviceFlow, DeviceFlowClient, DeviceFlowPoll, StopSignal};
pub use error::AuthError;
pub use token_cache::{TokenCache, TokenEntry};

/// Headers GitHub expects from an editor integration on its auth endpoints.
pub(crate) fn github_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert("editor-version", HeaderValue::from_static("Neovim/0.6.1"));
    headers.insert(
        "editor-plugin-version",
        HeaderValue::from_static("copilot.vim/1.16.0"),
    );
    headers.insert(USER_AGENT, HeaderValue::from_static("GithubCopilot/1.155.0"));
    headers
}

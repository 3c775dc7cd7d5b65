//! Expiry-aware cache of upstream tokens with one fetch in flight per credential.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};

use super::copilot::TokenFetcher;
use super::credentials::CredentialKey;
use super::error::AuthError;

pub const DEFAULT_SKEW_SECS: i64 = 60;

/// A resolved upstream token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenEntry {
    /// Usable only while `expires_at - skew` is still in the future.
    pub fn is_fresh(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - skew > now
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<TokenEntry, AuthError>>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<CredentialKey, TokenEntry>,
    inflight: HashMap<CredentialKey, SharedFetch>,
}

/// Resolves caller credentials to upstream tokens.
///
/// Cheap to clone; clones share the same cache.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use coxy::auth::{CopilotMetaClient, TokenCache};
///
/// # async fn run() -> Result<(), coxy::auth::AuthError> {
/// let cache = TokenCache::new(Arc::new(CopilotMetaClient::new(reqwest::Client::new())));
/// let entry = cache.resolve("gho_example").await?;
/// println!("Bearer {}", entry.token);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TokenCache {
    fetcher: Arc<dyn TokenFetcher>,
    skew: Duration,
    state: Arc<Mutex<CacheState>>,
}

impl TokenCache {
    pub fn new(fetcher: Arc<dyn TokenFetcher>) -> Self {
        Self {
            fetcher,
            skew: Duration::seconds(DEFAULT_SKEW_SECS),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// Return a fresh token for `credential`, fetching at most once per
    /// credential no matter how many callers are waiting.
    pub async fn resolve(&self, credential: &str) -> Result<TokenEntry, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let key = CredentialKey::derive(credential);

        let fetch = {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get(&key) {
                if entry.is_fresh(self.skew, Utc::now()) {
                    return Ok(entry.clone());
                }
            }
            match state.inflight.get(&key) {
                Some(pending) => {
                    tracing::debug!(key = %key, "joining in-flight token fetch");
                    pending.clone()
                }
                None => {
                    let fetch = self.start_fetch(key.clone(), credential.to_string());
                    state.inflight.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    /// Number of cached entries, fresh or not.
    pub fn cached_len(&self) -> usize {
        self.lock().entries.len()
    }

    fn start_fetch(&self, key: CredentialKey, credential: String) -> SharedFetch {
        let fetcher = Arc::clone(&self.fetcher);
        let state = Arc::clone(&self.state);
        async move {
            tracing::debug!(key = %key, "resolving upstream token");
            let result = fetcher
                .fetch(&credential)
                .await
                .map(|meta| TokenEntry {
                    token: meta.token,
                    expires_at: meta.expires_at,
                });

            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.inflight.remove(&key);
            match &result {
                Ok(entry) => {
                    state.entries.insert(key, entry.clone());
                }
                Err(error) => {
                    tracing::warn!(key = %key, error = %error, "upstream token fetch failed");
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_respects_skew() {
        let now = Utc::now();
        let entry = TokenEntry {
            token: "t".into(),
            expires_at: now + Duration::seconds(90),
        };
        assert!(entry.is_fresh(Duration::seconds(60), now));
        assert!(!entry.is_fresh(Duration::seconds(90), now));
        assert!(!entry.is_fresh(Duration::seconds(120), now));
    }
}

//! Caller credentials: header parsing, pseudonymized keys, and the lookup seam.

use std::collections::HashSet;
use std::fmt;
use std::sync::{OnceLock, PoisonError, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::error::AuthError;

const FINGERPRINT_LEN: usize = 8;

fn scheme_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| Regex::new(r"(?i)^(bearer|token)\s+").expect("static regex is valid"))
}

/// Pull the caller credential out of an `Authorization` header value.
///
/// Accepts `Bearer <c>` and `token <c>` (scheme is case-insensitive); a bare
/// value is taken as-is. Returns `None` when nothing is left.
pub fn extract_credential(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let credential = match scheme_prefix().find(header) {
        Some(m) => &header[m.end()..],
        None => header,
    };
    let credential = credential.trim();
    (!credential.is_empty()).then_some(credential)
}

/// Non-reversible key for a caller credential: SHA-256, URL-safe base64.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey(String);

impl CredentialKey {
    pub fn derive(credential: &str) -> Self {
        let digest = Sha256::digest(credential.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to put in logs.
    pub fn fingerprint(&self) -> &str {
        &self.0[..FINGERPRINT_LEN]
    }
}

impl fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CredentialKey").field(&self.fingerprint()).finish()
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fingerprint())
    }
}

/// Lookup of caller credentials that are allowed through the proxy.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn contains(&self, credential: &str) -> Result<bool, AuthError>;
    async fn insert(&self, credential: String) -> Result<(), AuthError>;
}

/// Process-local credential store. Holds only derived keys.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    keys: RwLock<HashSet<CredentialKey>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials<I, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = credentials
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .map(|c| CredentialKey::derive(&c))
            .collect();
        Self {
            keys: RwLock::new(keys),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn contains(&self, credential: &str) -> Result<bool, AuthError> {
        let key = CredentialKey::derive(credential);
        Ok(self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key))
    }

    async fn insert(&self, credential: String) -> Result<(), AuthError> {
        if credential.trim().is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let key = CredentialKey::derive(credential.trim());
        tracing::info!(key = %key, "registered caller credential");
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        Ok(())
    }
}

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// One device-authorization attempt, as returned by the device-code endpoint.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use coxy::auth::DeviceFlowSession;
///
/// let session = DeviceFlowSession {
///     device_code: "dc-123".to_string(),
///     user_code: "ABCD-EFGH".to_string(),
///     verification_uri: "https://github.com/login/device".to_string(),
///     expires_at: Utc::now() + chrono::Duration::minutes(15),
///     poll_interval: Duration::from_secs(5),
/// };
/// assert!(!session.is_expired());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFlowSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_at: DateTime<Utc>,
    /// Interval the provider asked for. Polling uses the configured interval.
    pub poll_interval: Duration,
}

impl DeviceFlowSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Progress of a device flow, delivered in order.
///
/// Serialized as `{"type": "...", "message": "...", ...}` with camelCase
/// fields and `expiresAt` in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "type", rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceFlowEvent {
    #[serde(rename_all = "camelCase")]
    Initiated {
        message: String,
        device_code: String,
        user_code: String,
        verification_uri: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        expires_at: DateTime<Utc>,
    },
    Pending {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Success {
        message: String,
        access_token: String,
    },
    Error {
        message: String,
    },
    Expired {
        message: String,
    },
}

impl DeviceFlowEvent {
    pub(crate) fn initiated(session: &DeviceFlowSession) -> Self {
        Self::Initiated {
            message: "Device flow initiated. Please visit the verification URL.".to_string(),
            device_code: session.device_code.clone(),
            user_code: session.user_code.clone(),
            verification_uri: session.verification_uri.clone(),
            expires_at: session.expires_at,
        }
    }

    pub(crate) fn pending() -> Self {
        Self::Pending {
            message: "Waiting for user authorization...".to_string(),
        }
    }

    pub(crate) fn success(access_token: String) -> Self {
        Self::Success {
            message: "Authorization successful!".to_string(),
            access_token,
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub(crate) fn expired() -> Self {
        Self::Expired {
            message: "Device code expired. Please start a new device flow.".to_string(),
        }
    }

    /// Wire name of the event (`initiated`, `pending`, ...).
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Initiated { message, .. }
            | Self::Pending { message }
            | Self::Success { message, .. }
            | Self::Error { message }
            | Self::Expired { message } => message,
        }
    }

    /// Whether the flow ends with this event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success { .. } | Self::Error { .. } | Self::Expired { .. }
        )
    }
}

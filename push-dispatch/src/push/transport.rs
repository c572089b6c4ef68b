//! The seam between the Delivery Engine and whatever actually talks to push services.

use async_trait::async_trait;

use super::keys::VapidKeys;
use crate::database::models::PushSubscriptionDbModel;

/// Seconds a push service may hold an undelivered message.
pub const DEFAULT_TTL_SECS: u32 = 3600;

/// Where and how to encrypt for a single browser registration.
#[derive(Debug, Clone, Copy)]
pub struct PushTarget<'a> {
    pub endpoint: &'a str,
    pub p256dh: &'a str,
    pub auth: &'a str,
}

impl<'a> From<&'a PushSubscriptionDbModel> for PushTarget<'a> {
    fn from(sub: &'a PushSubscriptionDbModel) -> Self {
        Self {
            endpoint: &sub.endpoint,
            p256dh: &sub.p256dh,
            auth: &sub.auth,
        }
    }
}

/// `Urgency` header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Urgency {
    VeryLow,
    Low,
    Normal,
    High,
}

/// An already-serialized notification body plus delivery hints.
#[derive(Debug, Clone, Copy)]
pub struct PushMessage<'a> {
    pub payload: &'a [u8],
    pub urgency: Urgency,
    pub ttl_secs: u32,
}

impl<'a> PushMessage<'a> {
    pub fn new(payload: &'a [u8], urgency: Urgency) -> Self {
        Self {
            payload,
            urgency,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

/// A failed send. `status_code` is `None` when no HTTP response arrived.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PushError {
    pub status_code: Option<u16>,
    pub message: String,
    /// The request could not be built locally, so it never left the process.
    pub rejected: bool,
}

impl PushError {
    pub fn status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            message: message.into(),
            rejected: false,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: message.into(),
            rejected: false,
        }
    }

    /// Malformed subscription keys, an unsealable payload or a signing failure.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: message.into(),
            rejected: true,
        }
    }

    /// 404 and 410 mean the registration is gone for good.
    pub fn is_permanent(&self) -> bool {
        matches!(self.status_code, Some(404 | 410))
    }

    /// Whether sending the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        !self.rejected && !self.is_permanent()
    }
}

/// Sends one encrypted message to one push endpoint.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        target: &PushTarget<'_>,
        message: &PushMessage<'_>,
        keys: &VapidKeys,
    ) -> Result<(), PushError>;
}

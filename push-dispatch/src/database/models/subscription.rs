//! Push subscription database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use url::Url;

use crate::database::time::now_ms;
use crate::{Error, Result};

/// Shortest `p256dh` accepted. A 65-byte P-256 point is 87 base64url chars.
pub const MIN_P256DH_LEN: usize = 80;

/// Shortest `auth` secret accepted. 16 bytes is 22 base64url chars.
pub const MIN_AUTH_LEN: usize = 16;

/// A registered device endpoint for one user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushSubscriptionDbModel {
    pub id: String,
    pub user_id: String,
    /// `None` is the user's undifferentiated subscription.
    pub device_id: Option<String>,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub is_active: bool,
    pub fail_count: i64,
    pub last_used_at: i64,
    pub last_fail_at: Option<i64>,
    /// Soft-delete marker.
    pub deleted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PushSubscriptionDbModel {
    pub fn new(
        user_id: impl Into<String>,
        device_id: Option<String>,
        keys: SubscriptionKeys,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            device_id,
            endpoint: keys.endpoint,
            p256dh: keys.p256dh,
            auth: keys.auth,
            is_active: true,
            fail_count: 0,
            last_used_at: now,
            last_fail_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this row may receive deliveries.
    pub fn is_deliverable(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

/// Delivery address of a subscription as handed over by the browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionKeys {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

impl SubscriptionKeys {
    /// Validate the endpoint scheme and the key lengths.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(self.endpoint.trim())
            .map_err(|e| Error::validation(format!("Invalid push endpoint URL: {}", e)))?;
        if url.scheme() != "https" {
            return Err(Error::validation("Push endpoint must use https"));
        }
        if url.host().is_none() {
            return Err(Error::validation("Push endpoint missing host"));
        }
        if self.p256dh.trim().len() < MIN_P256DH_LEN {
            return Err(Error::validation(format!(
                "p256dh key is too short ({} chars, expected at least {})",
                self.p256dh.trim().len(),
                MIN_P256DH_LEN
            )));
        }
        if self.auth.trim().len() < MIN_AUTH_LEN {
            return Err(Error::validation(format!(
                "auth secret is too short ({} chars, expected at least {})",
                self.auth.trim().len(),
                MIN_AUTH_LEN
            )));
        }
        Ok(())
    }
}

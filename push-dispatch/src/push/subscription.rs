//! Subscription lifecycle: register and remove browser endpoints.

use std::sync::Arc;

use tracing::info;

use crate::database::models::{PushSubscriptionDbModel, SubscriptionKeys};
use crate::database::repositories::{PreferenceRepository, SubscriptionRepository};
use crate::{Error, Result};

pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionRepository>,
    preferences: Arc<dyn PreferenceRepository>,
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        preferences: Arc<dyn PreferenceRepository>,
    ) -> Self {
        Self {
            subscriptions,
            preferences,
        }
    }

    /// Register (or re-register) the endpoint for `(user_id, device_id)`.
    ///
    /// The user's preference row is created with every category on if it
    /// does not exist, and re-activated otherwise.
    pub async fn subscribe(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        keys: SubscriptionKeys,
    ) -> Result<PushSubscriptionDbModel> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(Error::validation("user_id must not be empty"));
        }
        let device_id = device_id.map(str::trim).filter(|d| !d.is_empty());
        let keys = SubscriptionKeys {
            endpoint: keys.endpoint.trim().to_string(),
            p256dh: keys.p256dh.trim().to_string(),
            auth: keys.auth.trim().to_string(),
        };
        keys.validate()?;

        let sub = self.subscriptions.upsert(user_id, device_id, &keys).await?;
        self.preferences.ensure_active(user_id).await?;

        info!(
            user_id = %user_id,
            device_id = device_id.unwrap_or(""),
            subscription_id = %sub.id,
            "Push subscription registered"
        );
        Ok(sub)
    }

    /// Soft-delete the subscription. Returns whether an active row existed.
    ///
    /// When the user has no active subscription left their preference is
    /// marked inactive.
    pub async fn unsubscribe(&self, user_id: &str, device_id: Option<&str>) -> Result<bool> {
        let device_id = device_id.map(str::trim).filter(|d| !d.is_empty());
        let removed = self.subscriptions.soft_delete(user_id, device_id).await?;

        if self.subscriptions.count_active_for_user(user_id).await? == 0 {
            self.preferences.set_active(user_id, false).await?;
        }

        if removed {
            info!(
                user_id = %user_id,
                device_id = device_id.unwrap_or(""),
                "Push subscription removed"
            );
        }
        Ok(removed)
    }
}

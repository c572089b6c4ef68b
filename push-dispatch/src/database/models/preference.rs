//! Notification preference database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;
use crate::domain::NotificationType;

/// Per-user notification preference. One row per user.
///
/// Category flags are nullable; only an explicit `false` blocks a category.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPreferenceDbModel {
    pub user_id: String,
    pub visitor_alerts: Option<bool>,
    pub notice_alerts: Option<bool>,
    pub emergency_alerts: Option<bool>,
    pub maintenance_alerts: Option<bool>,
    pub is_active: bool,
    pub delivery_method: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl NotificationPreferenceDbModel {
    /// Default row created on first subscribe: every category on.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            user_id: user_id.into(),
            visitor_alerts: Some(true),
            notice_alerts: Some(true),
            emergency_alerts: Some(true),
            maintenance_alerts: Some(true),
            is_active: true,
            delivery_method: DeliveryMethod::Push.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The `{type}_alerts` flag for a category.
    pub fn category_flag(&self, notification_type: NotificationType) -> Option<bool> {
        match notification_type {
            NotificationType::Visitor => self.visitor_alerts,
            NotificationType::Notice => self.notice_alerts,
            NotificationType::Emergency => self.emergency_alerts,
            NotificationType::Maintenance => self.maintenance_alerts,
        }
    }

    /// Whether this preference lets a notification of `notification_type` through.
    pub fn allows(&self, notification_type: NotificationType) -> bool {
        self.is_active && self.category_flag(notification_type) != Some(false)
    }
}

/// Delivery channel selector. Only push is implemented.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Push,
    Other,
}

//! Notification categories and dispatch requests.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::{Error, Result};

/// Target URL opened when the notification is clicked and the request has none.
pub const DEFAULT_TARGET_URL: &str = "/admin/dashboard";

/// Closed set of notification categories.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Visitor,
    Notice,
    Emergency,
    Maintenance,
}

impl NotificationType {
    pub const ALL: [NotificationType; 4] = [
        NotificationType::Visitor,
        NotificationType::Notice,
        NotificationType::Emergency,
        NotificationType::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Parse a raw request value, rejecting anything outside the closed set.
    pub fn parse(input: &str) -> Result<Self> {
        Self::from_str(input.trim())
            .map_err(|_| Error::InvalidNotificationType(input.to_string()))
    }
}

/// Inbound dispatch request, as received from the HTTP layer.
///
/// Fields are optional at this level so that missing values are reported
/// with a stable code instead of a deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub farm_id: Option<String>,
    #[serde(default)]
    pub target_user_ids: Option<Vec<String>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub badge: Option<String>,
    #[serde(default)]
    pub require_interaction: Option<bool>,
}

impl DispatchRequest {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        notification_type: NotificationType,
    ) -> Self {
        Self {
            title: Some(title.into()),
            message: Some(message.into()),
            notification_type: Some(notification_type.to_string()),
            ..Default::default()
        }
    }

    pub fn with_targets<I, S>(mut self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_user_ids = Some(user_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_farm(mut self, farm_id: impl Into<String>) -> Self {
        self.farm_id = Some(farm_id.into());
        self
    }

    /// Validate required fields and the notification type.
    ///
    /// Pure: performs no I/O.
    pub fn validate(self) -> Result<ValidatedDispatch> {
        let title = non_blank(self.title);
        let message = non_blank(self.message);
        let notification_type = non_blank(self.notification_type);

        let mut missing = Vec::new();
        if title.is_none() {
            missing.push("title");
        }
        if message.is_none() {
            missing.push("message");
        }
        if notification_type.is_none() {
            missing.push("notificationType");
        }
        let (Some(title), Some(message), Some(notification_type)) =
            (title, message, notification_type)
        else {
            return Err(Error::MissingRequiredFields(missing));
        };

        let notification_type = NotificationType::parse(&notification_type)?;

        Ok(ValidatedDispatch {
            title,
            message,
            notification_type,
            audience: AudienceScope::from_targets(self.target_user_ids),
            farm_id: non_blank(self.farm_id),
            url: non_blank(self.url).unwrap_or_else(|| DEFAULT_TARGET_URL.to_string()),
            icon: non_blank(self.icon),
            badge: non_blank(self.badge),
            require_interaction: self.require_interaction.unwrap_or(false),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Who a dispatch is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceScope {
    /// Every eligible subscriber.
    Broadcast,
    /// Only subscriptions owned by these users (deduplicated, never empty).
    Targeted(Vec<String>),
}

impl AudienceScope {
    /// An absent or empty target list is a broadcast.
    pub fn from_targets(targets: Option<Vec<String>>) -> Self {
        match targets {
            Some(ids) if !ids.is_empty() => {
                let mut seen = HashSet::new();
                let ids = ids
                    .into_iter()
                    .map(|id| id.trim().to_string())
                    .filter(|id| seen.insert(id.clone()))
                    .collect();
                Self::Targeted(ids)
            }
            _ => Self::Broadcast,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast)
    }
}

/// A dispatch request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedDispatch {
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub audience: AudienceScope,
    /// Context only; carried into the payload and the audit log.
    pub farm_id: Option<String>,
    pub url: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub require_interaction: bool,
}

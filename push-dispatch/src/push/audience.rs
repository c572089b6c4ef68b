//! Audience Selector.
//!
//! Turns a dispatch scope into the list of subscriptions that will actually
//! be attempted: fetch candidates, then apply per-user preferences.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::database::models::{NotificationPreferenceDbModel, PushSubscriptionDbModel};
use crate::database::repositories::{PreferenceRepository, SubscriptionRepository};
use crate::domain::{AudienceScope, NotificationType};
use crate::{Error, Result};

/// Candidates fetched for a dispatch and the subset that passed filtering.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAudience {
    /// Subscriptions fetched before preference filtering.
    pub candidate_count: usize,
    pub subscriptions: Vec<PushSubscriptionDbModel>,
}

impl ResolvedAudience {
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

pub struct AudienceSelector {
    subscriptions: Arc<dyn SubscriptionRepository>,
    preferences: Arc<dyn PreferenceRepository>,
}

impl AudienceSelector {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        preferences: Arc<dyn PreferenceRepository>,
    ) -> Self {
        Self {
            subscriptions,
            preferences,
        }
    }

    pub async fn resolve(
        &self,
        scope: &AudienceScope,
        notification_type: NotificationType,
    ) -> Result<ResolvedAudience> {
        let candidates = match scope {
            AudienceScope::Broadcast => self.subscriptions.list_active().await,
            AudienceScope::Targeted(user_ids) => {
                self.subscriptions.list_active_for_users(user_ids).await
            }
        }
        .map_err(Error::subscriber_fetch)?;

        let candidates: Vec<_> = candidates
            .into_iter()
            .filter(PushSubscriptionDbModel::is_deliverable)
            .collect();
        let candidate_count = candidates.len();
        if candidates.is_empty() {
            debug!(broadcast = scope.is_broadcast(), "No candidate subscriptions");
            return Ok(ResolvedAudience::default());
        }

        let user_ids: Vec<String> = candidates
            .iter()
            .map(|s| s.user_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let preferences = self
            .preferences
            .list_active_for_users(&user_ids)
            .await
            .map_err(Error::settings_fetch)?;

        let subscriptions = filter_by_preferences(candidates, &preferences, notification_type);
        debug!(
            candidates = candidate_count,
            users = user_ids.len(),
            preferences = preferences.len(),
            audience = subscriptions.len(),
            notification_type = %notification_type,
            "Resolved push audience"
        );

        Ok(ResolvedAudience {
            candidate_count,
            subscriptions,
        })
    }
}

/// Keep subscriptions whose owner has an active preference allowing the category.
///
/// Owners without a preference row are excluded.
pub fn filter_by_preferences(
    candidates: Vec<PushSubscriptionDbModel>,
    preferences: &[NotificationPreferenceDbModel],
    notification_type: NotificationType,
) -> Vec<PushSubscriptionDbModel> {
    let lookup: HashMap<&str, &NotificationPreferenceDbModel> = preferences
        .iter()
        .filter(|p| p.is_active)
        .map(|p| (p.user_id.as_str(), p))
        .collect();

    candidates
        .into_iter()
        .filter(|sub| {
            lookup
                .get(sub.user_id.as_str())
                .is_some_and(|pref| pref.allows(notification_type))
        })
        .collect()
}

//! In-memory stores and a scripted transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::keys::{VapidKeys, generate_vapid_keys};
use super::transport::{PushError, PushMessage, PushTarget, PushTransport};
use crate::database::models::{
    NotificationPreferenceDbModel, PushSubscriptionDbModel, SubscriptionKeys,
};
use crate::database::repositories::{PreferenceRepository, SubscriptionRepository};
use crate::database::time::now_ms;
use crate::{Error, Result};

pub(crate) fn test_keys() -> VapidKeys {
    let (public, private) = generate_vapid_keys();
    VapidKeys::from_b64(&public, &private, "mailto:ops@farm.example").unwrap()
}

pub(crate) fn subscription(id: &str, user_id: &str) -> PushSubscriptionDbModel {
    let mut sub = PushSubscriptionDbModel::new(
        user_id,
        Some(format!("device-{}", id)),
        SubscriptionKeys {
            endpoint: format!("https://push.example/{}", id),
            p256dh: "p".repeat(87),
            auth: "a".repeat(22),
        },
    );
    sub.id = id.to_string();
    sub
}

#[derive(Default)]
pub(crate) struct MemorySubscriptions {
    rows: Mutex<Vec<PushSubscriptionDbModel>>,
    pub fail_fetch: AtomicBool,
    pub fetch_calls: AtomicUsize,
}

impl MemorySubscriptions {
    pub fn with_rows(rows: Vec<PushSubscriptionDbModel>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn find(&self, id: &str) -> Option<PushSubscriptionDbModel> {
        self.rows.lock().iter().find(|s| s.id == id).cloned()
    }

    fn check_fetch(&self) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Database("subscription store unavailable".into()));
        }
        Ok(())
    }

    fn update<F: FnOnce(&mut PushSubscriptionDbModel)>(&self, id: &str, f: F) {
        if let Some(row) = self.rows.lock().iter_mut().find(|s| s.id == id) {
            f(row);
        }
    }
}

#[async_trait]
impl SubscriptionRepository for MemorySubscriptions {
    async fn get(&self, id: &str) -> Result<PushSubscriptionDbModel> {
        self.find(id)
            .ok_or_else(|| Error::not_found("PushSubscription", id))
    }

    async fn find_by_user_device(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> Result<Option<PushSubscriptionDbModel>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|s| s.user_id == user_id && s.device_id.as_deref() == device_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<PushSubscriptionDbModel>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<PushSubscriptionDbModel>> {
        self.check_fetch()?;
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|s| s.is_deliverable())
            .cloned()
            .collect())
    }

    async fn list_active_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<PushSubscriptionDbModel>> {
        self.check_fetch()?;
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|s| s.is_deliverable() && user_ids.contains(&s.user_id))
            .cloned()
            .collect())
    }

    async fn count_active_for_user(&self, user_id: &str) -> Result<i64> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|s| s.user_id == user_id && s.is_deliverable())
            .count() as i64)
    }

    async fn upsert(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        keys: &SubscriptionKeys,
    ) -> Result<PushSubscriptionDbModel> {
        let mut rows = self.rows.lock();
        let now = now_ms();
        if let Some(row) = rows
            .iter_mut()
            .find(|s| s.user_id == user_id && s.device_id.as_deref() == device_id)
        {
            row.endpoint = keys.endpoint.clone();
            row.p256dh = keys.p256dh.clone();
            row.auth = keys.auth.clone();
            row.is_active = true;
            row.fail_count = 0;
            row.deleted_at = None;
            row.updated_at = now;
            return Ok(row.clone());
        }
        let row = PushSubscriptionDbModel::new(user_id, device_id.map(String::from), keys.clone());
        rows.push(row.clone());
        Ok(row)
    }

    async fn soft_delete(&self, user_id: &str, device_id: Option<&str>) -> Result<bool> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.iter_mut().find(|s| {
            s.user_id == user_id && s.device_id.as_deref() == device_id && s.is_deliverable()
        }) else {
            return Ok(false);
        };
        row.is_active = false;
        row.deleted_at = Some(now_ms());
        row.fail_count = 0;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|s| s.id != id);
        Ok(rows.len() != before)
    }

    async fn record_success(&self, id: &str) -> Result<()> {
        self.update(id, |row| {
            row.fail_count = 0;
            row.last_used_at = now_ms();
        });
        Ok(())
    }

    async fn record_failure(&self, id: &str) -> Result<()> {
        self.update(id, |row| {
            row.fail_count += 1;
            row.last_fail_at = Some(now_ms());
        });
        Ok(())
    }

    async fn deactivate_failing(&self, threshold: i64) -> Result<u64> {
        let mut count = 0;
        for row in self.rows.lock().iter_mut() {
            if row.is_deliverable() && row.fail_count >= threshold {
                row.is_active = false;
                row.deleted_at = Some(now_ms());
                count += 1;
            }
        }
        Ok(count)
    }
}

#[derive(Default)]
pub(crate) struct MemoryPreferences {
    rows: Mutex<HashMap<String, NotificationPreferenceDbModel>>,
    pub fail_fetch: AtomicBool,
    pub fetch_calls: AtomicUsize,
}

impl MemoryPreferences {
    pub fn with_rows(rows: Vec<NotificationPreferenceDbModel>) -> Self {
        Self {
            rows: Mutex::new(rows.into_iter().map(|p| (p.user_id.clone(), p)).collect()),
            ..Default::default()
        }
    }

    pub fn find(&self, user_id: &str) -> Option<NotificationPreferenceDbModel> {
        self.rows.lock().get(user_id).cloned()
    }
}

#[async_trait]
impl PreferenceRepository for MemoryPreferences {
    async fn get(&self, user_id: &str) -> Result<NotificationPreferenceDbModel> {
        self.find(user_id)
            .ok_or_else(|| Error::not_found("NotificationPreference", user_id))
    }

    async fn list_active_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<NotificationPreferenceDbModel>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Database("preference store unavailable".into()));
        }
        let rows = self.rows.lock();
        Ok(user_ids
            .iter()
            .filter_map(|id| rows.get(id))
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn ensure_active(&self, user_id: &str) -> Result<NotificationPreferenceDbModel> {
        let mut rows = self.rows.lock();
        let row = rows
            .entry(user_id.to_string())
            .or_insert_with(|| NotificationPreferenceDbModel::new(user_id));
        row.is_active = true;
        Ok(row.clone())
    }

    async fn set_active(&self, user_id: &str, is_active: bool) -> Result<()> {
        if let Some(row) = self.rows.lock().get_mut(user_id) {
            row.is_active = is_active;
        }
        Ok(())
    }

    async fn update(&self, preference: &NotificationPreferenceDbModel) -> Result<()> {
        self.rows
            .lock()
            .insert(preference.user_id.clone(), preference.clone());
        Ok(())
    }
}

/// Replays per-endpoint scripted results; falls back to success.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<std::result::Result<(), PushError>>>>,
    calls: Mutex<HashMap<String, u32>>,
    pub payloads: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTransport {
    pub fn script(
        self,
        endpoint: &str,
        results: Vec<std::result::Result<(), PushError>>,
    ) -> Self {
        self.scripts
            .lock()
            .insert(endpoint.to_string(), results.into_iter().collect());
        self
    }

    /// Every attempt against this endpoint fails with `status`.
    pub fn always_fail(self, endpoint: &str, status: u16) -> Self {
        let results = (0..16)
            .map(|_| Err(PushError::status(status, format!("status {}", status))))
            .collect();
        self.script(endpoint, results)
    }

    pub fn calls(&self, endpoint: &str) -> u32 {
        self.calls.lock().get(endpoint).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn send(
        &self,
        target: &PushTarget<'_>,
        message: &PushMessage<'_>,
        _keys: &VapidKeys,
    ) -> std::result::Result<(), PushError> {
        *self.calls.lock().entry(target.endpoint.to_string()).or_default() += 1;
        self.payloads.lock().push(message.payload.to_vec());
        let next = self
            .scripts
            .lock()
            .get_mut(target.endpoint)
            .and_then(|queue| queue.pop_front());
        next.unwrap_or(Ok(()))
    }
}

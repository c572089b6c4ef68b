//! System settings service.
//!
//! Wraps the settings repository and publishes a version counter that is
//! bumped on every write, so caches can tell when configuration changed.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::Result;
use crate::database::models::keys;
use crate::database::repositories::SettingsRepository;

/// Push presentation defaults configured by an administrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushDefaults {
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub require_interaction: bool,
    pub silent: bool,
    pub vibrate: bool,
}

pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
    version: watch::Sender<u64>,
}

impl SettingsService {
    pub fn new(repo: Arc<dyn SettingsRepository>) -> Self {
        let (version, _) = watch::channel(0);
        Self { repo, version }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.repo.get(key).await?;
        Ok(value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.repo.set(key, value).await?;
        self.bump(key);
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.repo.remove(key).await?;
        self.bump(key);
        Ok(())
    }

    /// Current configuration version.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Watch configuration changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self, key: &str) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        debug!(key = %key, version = self.version(), "System setting changed");
    }

    /// Load push presentation defaults. Unparseable flags read as `false`.
    pub async fn push_defaults(&self) -> Result<PushDefaults> {
        Ok(PushDefaults {
            icon: self.get(keys::PUSH_DEFAULT_ICON).await?,
            badge: self.get(keys::PUSH_DEFAULT_BADGE).await?,
            require_interaction: self.flag(keys::PUSH_REQUIRE_INTERACTION).await?,
            silent: self.flag(keys::PUSH_SILENT).await?,
            vibrate: self.flag(keys::PUSH_VIBRATE).await?,
        })
    }

    async fn flag(&self, key: &str) -> Result<bool> {
        let Some(raw) = self.get(key).await? else {
            return Ok(false);
        };
        match parse_flag(&raw) {
            Some(value) => Ok(value),
            None => {
                warn!(key = %key, value = %raw, "Ignoring unparseable boolean setting");
                Ok(false)
            }
        }
    }
}

fn parse_flag(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

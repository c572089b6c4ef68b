//! System settings database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Key/value row of `system_settings`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SystemSettingDbModel {
    pub key: String,
    pub value: String,
    pub updated_at: i64,
}

/// Well-known setting keys.
pub mod keys {
    pub const VAPID_PUBLIC_KEY: &str = "vapid.public_key";
    pub const VAPID_PRIVATE_KEY: &str = "vapid.private_key";
    pub const VAPID_SUBJECT: &str = "vapid.subject";

    pub const PUSH_DEFAULT_ICON: &str = "push.default_icon";
    pub const PUSH_DEFAULT_BADGE: &str = "push.default_badge";
    pub const PUSH_REQUIRE_INTERACTION: &str = "push.require_interaction";
    pub const PUSH_SILENT: &str = "push.silent";
    pub const PUSH_VIBRATE: &str = "push.vibrate";
}

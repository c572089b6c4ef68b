//! Notification payload shown by the service worker.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PushDefaults;
use crate::domain::{NotificationType, ValidatedDispatch};
use crate::{Error, Result};

pub const DEFAULT_ICON: &str = "/icons/icon-192x192.png";
pub const DEFAULT_BADGE: &str = "/icons/badge-72x72.png";

/// Upper bound on the serialized payload, below the 4 KiB push service limit.
pub const MAX_PAYLOAD_BYTES: usize = 3500;

const VIBRATE_PATTERN: [u32; 3] = [200, 100, 200];
const TITLE_MAX_CHARS: usize = 120;
const BODY_MAX_CHARS: usize = 600;
const FALLBACK_BODY: &str = "앱에서 자세한 내용을 확인하세요.";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    pub silent: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
    pub data: NotificationData,
}

impl NotificationPayload {
    /// Build the payload shared by every recipient of one dispatch.
    pub fn build(dispatch: &ValidatedDispatch, defaults: &PushDefaults, now: DateTime<Utc>) -> Self {
        let timestamp = now.timestamp_millis();
        let icon = dispatch
            .icon
            .clone()
            .or_else(|| defaults.icon.clone())
            .unwrap_or_else(|| DEFAULT_ICON.to_string());
        let badge = dispatch
            .badge
            .clone()
            .or_else(|| defaults.badge.clone())
            .unwrap_or_else(|| DEFAULT_BADGE.to_string());

        Self {
            title: dispatch.title.clone(),
            body: dispatch.message.clone(),
            icon,
            badge,
            tag: format!("{}-{}", dispatch.notification_type, timestamp),
            require_interaction: dispatch.require_interaction || defaults.require_interaction,
            silent: defaults.silent,
            vibrate: if defaults.vibrate && !defaults.silent {
                VIBRATE_PATTERN.to_vec()
            } else {
                Vec::new()
            },
            actions: vec![
                NotificationAction {
                    action: "view".to_string(),
                    title: "확인하기".to_string(),
                },
                NotificationAction {
                    action: "dismiss".to_string(),
                    title: "닫기".to_string(),
                },
            ],
            data: NotificationData {
                url: dispatch.url.clone(),
                farm_id: dispatch.farm_id.clone(),
                notification_type: dispatch.notification_type,
                timestamp,
            },
        }
    }

    /// Serialize, shrinking the text when the body would exceed `max_bytes`.
    ///
    /// Fails with a validation error when the non-text fields alone are too
    /// large, so nothing oversized ever reaches the fan-out.
    pub fn into_bytes_capped(mut self, max_bytes: usize) -> Result<Bytes> {
        self.title = truncate_chars(&self.title, TITLE_MAX_CHARS);
        self.body = truncate_chars(&self.body, BODY_MAX_CHARS);

        let bytes = serde_json::to_vec(&self)?;
        if bytes.len() <= max_bytes {
            return Ok(Bytes::from(bytes));
        }

        self.title = truncate_chars(&self.title, 80);
        self.body = FALLBACK_BODY.to_string();
        let bytes = serde_json::to_vec(&self)?;
        if bytes.len() > max_bytes {
            return Err(Error::validation(format!(
                "Notification payload is {} bytes after shortening, limit is {}",
                bytes.len(),
                max_bytes
            )));
        }
        Ok(Bytes::from(bytes))
    }
}

/// Keep at most `max_chars` characters, marking the cut with an ellipsis.
pub(crate) fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        None => input.to_string(),
        Some(_) if max_chars == 0 => String::new(),
        Some((cut, _)) => format!("{}…", &input[..cut]),
    }
}

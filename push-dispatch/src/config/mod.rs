//! Process configuration and the system settings service.
//!
//! `AppConfig` is read once from the environment (after `.env` is loaded);
//! `SettingsService` serves values that can change at runtime.

pub mod settings;

pub use settings::{PushDefaults, SettingsService};

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::RetryPolicy;
use crate::{Error, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite:push.db?mode=rwc";
const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_FAIL_THRESHOLD: i64 = 5;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_VAPID_SUBJECT: &str = "mailto:admin@localhost";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// VAPID keys supplied through the environment. Take precedence over settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VapidEnvOverride {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub retry_policy: RetryPolicy,
    /// Max concurrent outbound push requests per dispatch.
    pub concurrency: usize,
    /// Per-attempt transport timeout.
    pub request_timeout: Duration,
    /// Cumulative `fail_count` at which the janitor deactivates a subscription.
    pub fail_threshold: i64,
    pub cleanup_interval: Duration,
    pub vapid_override: Option<VapidEnvOverride>,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            retry_policy: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            vapid_override: None,
            log_format: LogFormat::default(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let retry_policy = RetryPolicy {
            max_attempts: parse_var(&get, "PUSH_MAX_ATTEMPTS")?
                .unwrap_or(defaults.retry_policy.max_attempts),
            base_delay: parse_var(&get, "PUSH_BACKOFF_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_policy.base_delay),
            max_delay: parse_var(&get, "PUSH_BACKOFF_MAX_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_policy.max_delay),
            ..defaults.retry_policy.clone()
        };
        if retry_policy.max_attempts == 0 {
            return Err(Error::config("PUSH_MAX_ATTEMPTS must be at least 1"));
        }

        let concurrency: usize =
            parse_var(&get, "PUSH_CONCURRENCY")?.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(Error::config("PUSH_CONCURRENCY must be at least 1"));
        }

        let vapid_override = match (
            get("WEB_PUSH_VAPID_PUBLIC_KEY"),
            get("WEB_PUSH_VAPID_PRIVATE_KEY"),
        ) {
            (None, None) => None,
            (Some(public_key), Some(private_key)) => Some(VapidEnvOverride {
                public_key,
                private_key,
                subject: get("WEB_PUSH_VAPID_SUBJECT")
                    .unwrap_or_else(|| DEFAULT_VAPID_SUBJECT.to_string()),
            }),
            _ => {
                return Err(Error::config(
                    "Both WEB_PUSH_VAPID_PUBLIC_KEY and WEB_PUSH_VAPID_PRIVATE_KEY must be set",
                ));
            }
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            retry_policy,
            concurrency,
            request_timeout: parse_var(&get, "PUSH_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            fail_threshold: parse_var(&get, "PUSH_FAIL_THRESHOLD")?
                .unwrap_or(defaults.fail_threshold),
            cleanup_interval: parse_var(&get, "PUSH_CLEANUP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            vapid_override,
            log_format: parse_var(&get, "LOG_FORMAT")?.unwrap_or_default(),
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_var<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| Error::config(format!("Invalid {}='{}': {}", key, raw, e)))
        })
        .transpose()
}

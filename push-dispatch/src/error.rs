//! Application-wide error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<&'static str>),

    #[error("Invalid notification type: {0}")]
    InvalidNotificationType(String),

    #[error("VAPID keys are not configured")]
    VapidKeysNotSet,

    #[error("Failed to fetch subscribers: {0}")]
    SubscriberFetch(#[source] Box<Error>),

    #[error("Failed to fetch notification settings: {0}")]
    NotificationSettingsFetch(#[source] Box<Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn subscriber_fetch(err: Error) -> Self {
        Self::SubscriberFetch(Box::new(err))
    }

    pub fn settings_fetch(err: Error) -> Self {
        Self::NotificationSettingsFetch(Box::new(err))
    }

    /// Stable machine-readable code reported to callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingRequiredFields(_) => ErrorCode::MissingRequiredFields,
            Self::InvalidNotificationType(_) => ErrorCode::InvalidNotificationType,
            Self::VapidKeysNotSet => ErrorCode::VapidKeysNotSet,
            Self::SubscriberFetch(_) => ErrorCode::SubscriberFetchFailed,
            Self::NotificationSettingsFetch(_) => ErrorCode::NotificationSettingsFetchFailed,
            _ => ErrorCode::InternalServerError,
        }
    }
}

/// Machine-readable dispatch error codes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingRequiredFields,
    InvalidNotificationType,
    VapidKeysNotSet,
    SubscriberFetchFailed,
    NotificationSettingsFetchFailed,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Error body handed back to the host framework.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

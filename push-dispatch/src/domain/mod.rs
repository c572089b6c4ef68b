//! Domain types for push dispatch.

pub mod notification;
pub mod value_objects;

pub use notification::{AudienceScope, DEFAULT_TARGET_URL, DispatchRequest, NotificationType, ValidatedDispatch};
pub use value_objects::RetryPolicy;

//! Push notification dispatch.
//!
//! Request flow: [`DispatchService`] validates the request, the
//! [`AudienceSelector`] resolves eligible subscriptions, the
//! [`DeliveryEngine`] fans out over a [`PushTransport`] signed with keys from
//! a [`KeyProvider`], and the [`DispatchReporter`] summarizes the outcomes.

pub mod audience;
pub mod delivery;
pub mod ece;
pub mod janitor;
pub mod keys;
pub mod payload;
pub mod report;
pub mod service;
pub mod subscription;
pub mod transport;
pub mod vapid;
pub mod web_push;

#[cfg(test)]
pub(crate) mod test_support;

pub use audience::{AudienceSelector, ResolvedAudience};
pub use delivery::{DeliveryEngine, DispatchOutcome, FailureClass};
pub use janitor::{JanitorConfig, JanitorReport, SubscriptionJanitor};
pub use keys::{KeyProvider, SettingsKeyProvider, StaticKeyProvider, VapidKeys, generate_vapid_keys};
pub use payload::NotificationPayload;
pub use report::{DispatchReporter, DispatchSummary, FailureKind, NO_RECIPIENTS_MESSAGE};
pub use service::DispatchService;
pub use subscription::SubscriptionService;
pub use transport::{PushError, PushMessage, PushTarget, PushTransport, Urgency};
pub use web_push::WebPushClient;

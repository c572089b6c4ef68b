//! Delivery Engine.
//!
//! Fans a dispatch out to every subscription concurrently (bounded by a
//! semaphore), retries transient failures with exponential backoff, and
//! writes the terminal outcome of each subscription back to the store.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::keys::{KeyProvider, VapidKeys};
use super::report::FailureKind;
use super::transport::{PushError, PushMessage, PushTarget, PushTransport, Urgency};
use crate::Result;
use crate::database::models::PushSubscriptionDbModel;
use crate::database::repositories::SubscriptionRepository;
use crate::domain::RetryPolicy;

/// Error text recorded for subscriptions cut short by cancellation.
pub const CANCELLED_ERROR: &str = "cancelled";

/// Why a delivery ended in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureClass {
    /// Endpoint is gone (404/410). The subscription is deleted.
    Permanent,
    /// Retry budget exhausted on any other error.
    Transient,
    /// The dispatch was cancelled before this delivery finished.
    Cancelled,
    /// The request could not be built, so nothing was sent. The row is untouched.
    Rejected,
}

/// Terminal result for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub subscription_id: String,
    pub user_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    /// Attempts actually made.
    pub retry_count: u32,
}

impl DispatchOutcome {
    fn delivered(sub: &PushSubscriptionDbModel, attempts: u32) -> Self {
        Self {
            subscription_id: sub.id.clone(),
            user_id: sub.user_id.clone(),
            success: true,
            error: None,
            status_code: None,
            failure_class: None,
            retry_count: attempts,
        }
    }

    fn failed(
        subscription_id: String,
        user_id: String,
        error: String,
        status_code: Option<u16>,
        class: FailureClass,
        attempts: u32,
    ) -> Self {
        Self {
            subscription_id,
            user_id,
            success: false,
            error: Some(error),
            status_code,
            failure_class: Some(class),
            retry_count: attempts,
        }
    }

    /// Histogram bucket; `Other` for successes.
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::from_status(self.status_code)
    }
}

/// What the retry loop ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    Failed(PushError),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryReport {
    pub attempts: u32,
    pub result: DeliveryResult,
}

/// Send with the retry policy.
///
/// Permanent and rejected errors stop immediately. Transient errors sleep
/// `policy.delay_for_attempt(n)` and try again until the budget is spent.
/// Performs no store writes.
pub async fn send_with_retry(
    transport: &dyn PushTransport,
    target: &PushTarget<'_>,
    message: &PushMessage<'_>,
    keys: &VapidKeys,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> RetryReport {
    let mut attempts = 0;
    loop {
        if cancel.is_cancelled() {
            return RetryReport {
                attempts,
                result: DeliveryResult::Cancelled,
            };
        }

        attempts += 1;
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return RetryReport { attempts, result: DeliveryResult::Cancelled };
            }
            sent = transport.send(target, message, keys) => sent,
        };

        let err = match sent {
            Ok(()) => {
                return RetryReport {
                    attempts,
                    result: DeliveryResult::Delivered,
                };
            }
            Err(err) => err,
        };

        if !err.is_retryable() || !policy.should_retry(attempts) {
            return RetryReport {
                attempts,
                result: DeliveryResult::Failed(err),
            };
        }

        let delay = policy.delay_for_attempt(attempts);
        debug!(
            endpoint = %target.endpoint,
            attempt = attempts,
            status = ?err.status_code,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Push attempt failed, retrying"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return RetryReport { attempts, result: DeliveryResult::Cancelled };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

pub struct DeliveryEngine {
    transport: Arc<dyn PushTransport>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    key_provider: Arc<dyn KeyProvider>,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
}

impl DeliveryEngine {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        key_provider: Arc<dyn KeyProvider>,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            transport,
            subscriptions,
            key_provider,
            policy,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Signing keys for the next dispatch.
    pub async fn signing_keys(&self) -> Result<Arc<VapidKeys>> {
        self.key_provider.current_keys().await
    }

    /// Deliver `payload` to every subscription, signed with `keys`, and wait
    /// for all of them. Every delivery problem ends up in its subscription's
    /// outcome.
    pub async fn deliver(
        &self,
        subscriptions: Vec<PushSubscriptionDbModel>,
        payload: Bytes,
        urgency: Urgency,
        keys: Arc<VapidKeys>,
        cancel: &CancellationToken,
    ) -> Vec<DispatchOutcome> {
        let total = subscriptions.len();

        let mut tasks = JoinSet::new();
        let mut owners = HashMap::with_capacity(total);
        for sub in subscriptions {
            let owner = (sub.id.clone(), sub.user_id.clone());
            let task = DeliveryTask {
                transport: self.transport.clone(),
                store: self.subscriptions.clone(),
                keys: keys.clone(),
                policy: self.policy.clone(),
                semaphore: self.semaphore.clone(),
                payload: payload.clone(),
                urgency,
                cancel: cancel.clone(),
            };
            let handle = tasks.spawn(task.run(sub));
            owners.insert(handle.id(), owner);
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    owners.remove(&id);
                    outcomes.push(outcome);
                }
                Err(e) => {
                    let (subscription_id, user_id) = owners.remove(&e.id()).unwrap_or_default();
                    error!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "Push delivery task aborted"
                    );
                    outcomes.push(DispatchOutcome::failed(
                        subscription_id,
                        user_id,
                        format!("delivery task aborted: {}", e),
                        None,
                        FailureClass::Transient,
                        0,
                    ));
                }
            }
        }

        debug!(
            total,
            delivered = outcomes.iter().filter(|o| o.success).count(),
            "Push fan-out finished"
        );
        outcomes
    }
}

/// Everything one subscription's task needs, owned so it can be spawned.
struct DeliveryTask {
    transport: Arc<dyn PushTransport>,
    store: Arc<dyn SubscriptionRepository>,
    keys: Arc<VapidKeys>,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    payload: Bytes,
    urgency: Urgency,
    cancel: CancellationToken,
}

impl DeliveryTask {
    async fn run(self, sub: PushSubscriptionDbModel) -> DispatchOutcome {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return self.complete(&sub, RetryReport {
                attempts: 0,
                result: DeliveryResult::Cancelled,
            })
            .await;
        };

        let target = PushTarget::from(&sub);
        let message = PushMessage::new(&self.payload, self.urgency);
        let report = send_with_retry(
            self.transport.as_ref(),
            &target,
            &message,
            &self.keys,
            &self.policy,
            &self.cancel,
        )
        .await;
        self.complete(&sub, report).await
    }

    /// Apply the terminal outcome to the store.
    ///
    /// Permanent failures delete the row, exhausted transient failures bump
    /// its fail count. Cancelled and rejected deliveries leave it untouched.
    async fn complete(&self, sub: &PushSubscriptionDbModel, report: RetryReport) -> DispatchOutcome {
        let attempts = report.attempts;
        match report.result {
            DeliveryResult::Delivered => {
                if let Err(e) = self.store.record_success(&sub.id).await {
                    warn!(subscription_id = %sub.id, error = %e, "Failed to record push success");
                }
                DispatchOutcome::delivered(sub, attempts)
            }
            DeliveryResult::Failed(err) if err.is_permanent() => {
                match self.store.delete(&sub.id).await {
                    Ok(_) => info!(
                        subscription_id = %sub.id,
                        user_id = %sub.user_id,
                        status = ?err.status_code,
                        "Deleted stale push subscription"
                    ),
                    Err(e) => warn!(
                        subscription_id = %sub.id,
                        error = %e,
                        "Failed to delete stale push subscription"
                    ),
                }
                DispatchOutcome::failed(
                    sub.id.clone(),
                    sub.user_id.clone(),
                    err.message,
                    err.status_code,
                    FailureClass::Permanent,
                    attempts,
                )
            }
            DeliveryResult::Failed(err) if err.rejected => {
                warn!(
                    subscription_id = %sub.id,
                    error = %err,
                    "Push request rejected before sending"
                );
                DispatchOutcome::failed(
                    sub.id.clone(),
                    sub.user_id.clone(),
                    err.message,
                    None,
                    FailureClass::Rejected,
                    attempts,
                )
            }
            DeliveryResult::Failed(err) => {
                if let Err(e) = self.store.record_failure(&sub.id).await {
                    warn!(subscription_id = %sub.id, error = %e, "Failed to record push failure");
                }
                DispatchOutcome::failed(
                    sub.id.clone(),
                    sub.user_id.clone(),
                    err.message,
                    err.status_code,
                    FailureClass::Transient,
                    attempts,
                )
            }
            DeliveryResult::Cancelled => DispatchOutcome::failed(
                sub.id.clone(),
                sub.user_id.clone(),
                CANCELLED_ERROR.to_string(),
                None,
                FailureClass::Cancelled,
                attempts,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::keys::StaticKeyProvider;
    use crate::push::test_support::{
        MemorySubscriptions, ScriptedTransport, subscription, test_keys,
    };
    use std::time::Duration;
    use tokio::time::Instant;

    const EP1: &str = "https://push.example/s1";
    const EP2: &str = "https://push.example/s2";
    const EP3: &str = "https://push.example/s3";

    fn engine(
        transport: Arc<ScriptedTransport>,
        store: Arc<MemorySubscriptions>,
        concurrency: usize,
    ) -> DeliveryEngine {
        DeliveryEngine::new(
            transport,
            store,
            Arc::new(StaticKeyProvider::new(test_keys())),
            RetryPolicy::default(),
            concurrency,
        )
    }

    async fn deliver_all(
        engine: &DeliveryEngine,
        store: &MemorySubscriptions,
        urgency: Urgency,
        cancel: &CancellationToken,
    ) -> Vec<DispatchOutcome> {
        let keys = engine.signing_keys().await.unwrap();
        engine
            .deliver(store_rows(store), payload(), urgency, keys, cancel)
            .await
    }

    fn payload() -> Bytes {
        Bytes::from_static(br#"{"title":"t"}"#)
    }

    #[tokio::test(start_paused = true)]
    async fn test_gone_stops_after_one_attempt_and_deletes() {
        let transport = Arc::new(ScriptedTransport::default().always_fail(EP1, 410));
        let store = Arc::new(MemorySubscriptions::with_rows(vec![subscription("s1", "u1")]));
        let started = Instant::now();

        let outcomes = deliver_all(
            &engine(transport.clone(), store.clone(), 4),
            &store,
            Urgency::Normal,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(transport.calls(EP1), 1);
        assert_eq!(outcomes[0].retry_count, 1);
        assert_eq!(outcomes[0].status_code, Some(410));
        assert_eq!(outcomes[0].failure_class, Some(FailureClass::Permanent));
        assert!(store.find("s1").is_none());
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_permanent() {
        let transport = Arc::new(ScriptedTransport::default().always_fail(EP1, 404));
        let store = Arc::new(MemorySubscriptions::with_rows(vec![subscription("s1", "u1")]));

        let outcomes = deliver_all(
            &engine(transport.clone(), store.clone(), 4),
            &store,
            Urgency::Normal,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(transport.calls(EP1), 1);
        assert_eq!(outcomes[0].failure_kind(), FailureKind::NotFound);
        assert!(store.find("s1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_exhausts_budget_with_backoff() {
        let transport = Arc::new(ScriptedTransport::default().always_fail(EP1, 500));
        let store = Arc::new(MemorySubscriptions::with_rows(vec![subscription("s1", "u1")]));
        let started = Instant::now();

        let outcomes = deliver_all(
            &engine(transport.clone(), store.clone(), 4),
            &store,
            Urgency::Normal,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(transport.calls(EP1), 3);
        assert_eq!(outcomes[0].retry_count, 3);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].status_code, Some(500));
        assert_eq!(outcomes[0].failure_class, Some(FailureClass::Transient));
        // 1s + 2s of backoff between three attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3100), "{:?}", elapsed);

        let row = store.find("s1").unwrap();
        assert_eq!(row.fail_count, 1);
        assert!(row.last_fail_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_second_attempt() {
        let transport = Arc::new(ScriptedTransport::default().script(
            EP1,
            vec![Err(PushError::transport("connection reset")), Ok(())],
        ));
        let mut row = subscription("s1", "u1");
        row.fail_count = 2;
        let store = Arc::new(MemorySubscriptions::with_rows(vec![row]));

        let outcomes = deliver_all(
            &engine(transport.clone(), store.clone(), 4),
            &store,
            Urgency::Normal,
            &CancellationToken::new(),
        )
        .await;

        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].retry_count, 2);
        assert_eq!(transport.calls(EP1), 2);
        assert_eq!(store.find("s1").unwrap().fail_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_do_not_block_other_subscriptions() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .always_fail(EP1, 503)
                .always_fail(EP2, 410),
        );
        let store = Arc::new(MemorySubscriptions::with_rows(vec![
            subscription("s1", "u1"),
            subscription("s2", "u2"),
            subscription("s3", "u3"),
        ]));
        let started = Instant::now();

        let mut outcomes = deliver_all(
            &engine(transport.clone(), store.clone(), 8),
            &store,
            Urgency::High,
            &CancellationToken::new(),
        )
        .await;
        outcomes.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));

        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[1].failure_class, Some(FailureClass::Permanent));
        assert!(outcomes[2].success);
        assert_eq!(transport.calls(EP3), 1);
        // Barrier waits only for the slowest subscription.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3100), "{:?}", elapsed);
        assert!(store.find("s2").is_none());
        assert!(store.find("s3").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_subscription_gets_the_same_payload() {
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(MemorySubscriptions::with_rows(vec![
            subscription("s1", "u1"),
            subscription("s2", "u1"),
        ]));

        deliver_all(
            &engine(transport.clone(), store.clone(), 1),
            &store,
            Urgency::Normal,
            &CancellationToken::new(),
        )
        .await;

        let payloads = transport.payloads.lock();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], payloads[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_yields_complete_outcomes() {
        let transport = Arc::new(ScriptedTransport::default().always_fail(EP1, 500));
        let store = Arc::new(MemorySubscriptions::with_rows(vec![
            subscription("s1", "u1"),
            subscription("s2", "u2"),
        ]));
        let cancel = CancellationToken::new();
        let engine = engine(transport.clone(), store.clone(), 4);

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                cancel.cancel();
            })
        };
        let mut outcomes = deliver_all(&engine, &store, Urgency::Normal, &cancel).await;
        canceller.await.unwrap();
        outcomes.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].failure_class, Some(FailureClass::Cancelled));
        assert_eq!(outcomes[0].error.as_deref(), Some(CANCELLED_ERROR));
        assert_eq!(outcomes[0].failure_kind(), FailureKind::Other);
        assert!(outcomes[1].success);
        // Cancelled deliveries leave the row untouched.
        assert_eq!(store.find("s1").unwrap().fail_count, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_attempts() {
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(MemorySubscriptions::with_rows(vec![subscription("s1", "u1")]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = deliver_all(
            &engine(transport.clone(), store.clone(), 1),
            &store,
            Urgency::Normal,
            &cancel,
        )
        .await;

        assert_eq!(transport.total_calls(), 0);
        assert_eq!(outcomes[0].retry_count, 0);
        assert_eq!(outcomes[0].failure_class, Some(FailureClass::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_request_is_not_retried_or_counted() {
        let transport = Arc::new(ScriptedTransport::default().script(
            EP1,
            vec![Err(PushError::rejected(
                "payload does not fit in one 4096-byte record",
            ))],
        ));
        let store = Arc::new(MemorySubscriptions::with_rows(vec![subscription("s1", "u1")]));

        let outcomes = deliver_all(
            &engine(transport.clone(), store.clone(), 4),
            &store,
            Urgency::Normal,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(transport.calls(EP1), 1);
        assert_eq!(outcomes[0].retry_count, 1);
        assert_eq!(outcomes[0].failure_class, Some(FailureClass::Rejected));
        let row = store.find("s1").unwrap();
        assert_eq!(row.fail_count, 0);
        assert!(row.last_fail_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_with_retry_without_retries() {
        let transport = ScriptedTransport::default().always_fail(EP1, 500);
        let sub = subscription("s1", "u1");
        let keys = test_keys();
        let report = send_with_retry(
            &transport,
            &PushTarget::from(&sub),
            &PushMessage::new(b"{}", Urgency::Normal),
            &keys,
            &RetryPolicy::no_retry(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.attempts, 1);
        assert!(matches!(report.result, DeliveryResult::Failed(ref e) if e.status_code == Some(500)));
    }

    fn store_rows(store: &MemorySubscriptions) -> Vec<PushSubscriptionDbModel> {
        ["s1", "s2", "s3"]
            .iter()
            .filter_map(|id| store.find(id))
            .collect()
    }
}

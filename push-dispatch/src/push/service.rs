//! Dispatch orchestration.
//!
//! `RECEIVED -> VALIDATED -> AUDIENCE_RESOLVED -> (empty: reported) |
//! (DELIVERING -> REPORTED)`. Validation and audience errors abort before
//! any delivery; delivery errors only ever show up in the outcomes.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::audience::AudienceSelector;
use super::delivery::DeliveryEngine;
use super::keys::VapidKeys;
use super::payload::{MAX_PAYLOAD_BYTES, NotificationPayload};
use super::report::{DispatchContext, DispatchReporter, DispatchSummary};
use super::transport::Urgency;
use crate::config::{PushDefaults, SettingsService};
use crate::database::repositories::FarmMemberRepository;
use crate::domain::{AudienceScope, DispatchRequest, NotificationType, ValidatedDispatch};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
enum DispatchStage {
    Received,
    Validated,
    AudienceResolved,
    Delivering,
    Reported,
}

fn urgency_for(notification_type: NotificationType) -> Urgency {
    match notification_type {
        NotificationType::Emergency => Urgency::High,
        _ => Urgency::Normal,
    }
}

pub struct DispatchService {
    audience: AudienceSelector,
    engine: DeliveryEngine,
    reporter: DispatchReporter,
    settings: Arc<SettingsService>,
    farms: Option<Arc<dyn FarmMemberRepository>>,
}

impl DispatchService {
    pub fn new(
        audience: AudienceSelector,
        engine: DeliveryEngine,
        reporter: DispatchReporter,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            audience,
            engine,
            reporter,
            settings,
            farms: None,
        }
    }

    pub fn with_farm_members(mut self, farms: Arc<dyn FarmMemberRepository>) -> Self {
        self.farms = Some(farms);
        self
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchSummary> {
        self.dispatch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Dispatch, aborting in-flight deliveries when `cancel` fires.
    ///
    /// Cancelled deliveries still produce outcomes, so the summary is complete.
    pub async fn dispatch_with_cancel(
        &self,
        request: DispatchRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary> {
        debug!(stage = %DispatchStage::Received, "Push dispatch received");
        let dispatch = validate(request)?;
        self.run(dispatch, cancel).await
    }

    /// Dispatch to the members of one farm.
    ///
    /// A farm without members reports no recipients; it never broadcasts.
    pub async fn dispatch_to_farm(
        &self,
        farm_id: &str,
        request: DispatchRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary> {
        debug!(stage = %DispatchStage::Received, farm_id = %farm_id, "Farm push dispatch received");
        let mut dispatch = validate(request)?;
        let keys = self.preflight_keys().await?;

        let farms = self
            .farms
            .as_ref()
            .ok_or_else(|| Error::config("Farm membership store is not configured"))?;
        let members = farms
            .list_user_ids(farm_id)
            .await
            .map_err(Error::subscriber_fetch)?;

        dispatch.farm_id = Some(farm_id.to_string());
        let AudienceScope::Targeted(members) = AudienceScope::from_targets(Some(members)) else {
            let ctx = DispatchContext {
                notification_type: dispatch.notification_type,
                farm_id: dispatch.farm_id,
                title: dispatch.title,
                candidate_count: 0,
                audience_count: 0,
            };
            return Ok(self.reporter.report_empty(&ctx).await);
        };
        dispatch.audience = AudienceScope::Targeted(members);
        self.deliver(dispatch, keys, cancel).await
    }

    async fn run(
        &self,
        dispatch: ValidatedDispatch,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary> {
        let keys = self.preflight_keys().await?;
        self.deliver(dispatch, keys, cancel).await
    }

    /// Keys are checked before touching the stores.
    async fn preflight_keys(&self) -> Result<Arc<VapidKeys>> {
        self.engine.signing_keys().await.inspect_err(|e| {
            warn!(code = %e.code(), error = %e, "Push dispatch aborted");
        })
    }

    async fn deliver(
        &self,
        dispatch: ValidatedDispatch,
        keys: Arc<VapidKeys>,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary> {
        let defaults = self.settings.push_defaults().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load push defaults, using built-in values");
            PushDefaults::default()
        });
        let payload = NotificationPayload::build(&dispatch, &defaults, Utc::now())
            .into_bytes_capped(MAX_PAYLOAD_BYTES)
            .inspect_err(|e| warn!(code = %e.code(), error = %e, "Rejected push payload"))?;

        let audience = self
            .audience
            .resolve(&dispatch.audience, dispatch.notification_type)
            .await
            .inspect_err(|e| warn!(code = %e.code(), error = %e, "Push audience resolution failed"))?;
        debug!(
            stage = %DispatchStage::AudienceResolved,
            candidates = audience.candidate_count,
            audience = audience.len(),
            "Push audience resolved"
        );

        let ctx = DispatchContext {
            notification_type: dispatch.notification_type,
            farm_id: dispatch.farm_id.clone(),
            title: dispatch.title.clone(),
            candidate_count: audience.candidate_count,
            audience_count: audience.len(),
        };
        if audience.is_empty() {
            return Ok(self.reporter.report_empty(&ctx).await);
        }

        debug!(
            stage = %DispatchStage::Delivering,
            recipients = audience.len(),
            payload_bytes = payload.len(),
            "Delivering push notification"
        );
        let outcomes = self
            .engine
            .deliver(
                audience.subscriptions,
                payload,
                urgency_for(dispatch.notification_type),
                keys,
                cancel,
            )
            .await;

        let summary = self.reporter.report(outcomes, &ctx).await;
        debug!(stage = %DispatchStage::Reported, "Push dispatch reported");
        Ok(summary)
    }
}

fn validate(request: DispatchRequest) -> Result<ValidatedDispatch> {
    let dispatch = request
        .validate()
        .inspect_err(|e| warn!(code = %e.code(), error = %e, "Rejected push dispatch request"))?;
    debug!(
        stage = %DispatchStage::Validated,
        notification_type = %dispatch.notification_type,
        broadcast = dispatch.audience.is_broadcast(),
        "Push dispatch validated"
    );
    Ok(dispatch)
}

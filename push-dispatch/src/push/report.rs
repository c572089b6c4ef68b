//! Dispatch Reporter.
//!
//! Aggregates per-subscription outcomes into a summary, emits the audit
//! records and persists a dispatch log row.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::delivery::DispatchOutcome;
use crate::database::models::DispatchLogDbModel;
use crate::database::repositories::DispatchLogRepository;
use crate::database::time::now_ms;
use crate::domain::NotificationType;
use crate::logging::AUDIT_TARGET;

/// Message returned when nobody is eligible.
pub const NO_RECIPIENTS_MESSAGE: &str = "발송할 구독자가 없습니다.";

/// Histogram bucket for a failed outcome. Reporting only.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
pub enum FailureKind {
    #[serde(rename = "410_GONE")]
    #[strum(serialize = "410_GONE")]
    Gone,
    #[serde(rename = "404_NOT_FOUND")]
    #[strum(serialize = "404_NOT_FOUND")]
    NotFound,
    #[serde(rename = "429_RATE_LIMIT")]
    #[strum(serialize = "429_RATE_LIMIT")]
    RateLimited,
    #[serde(rename = "OTHER")]
    #[strum(serialize = "OTHER")]
    Other,
}

impl FailureKind {
    pub fn from_status(status_code: Option<u16>) -> Self {
        match status_code {
            Some(410) => Self::Gone,
            Some(404) => Self::NotFound,
            Some(429) => Self::RateLimited,
            _ => Self::Other,
        }
    }
}

pub type FailureHistogram = BTreeMap<FailureKind, usize>;

/// Result handed back to the caller of a dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub message: String,
    pub sent_count: usize,
    pub failure_count: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_histogram: FailureHistogram,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<DispatchOutcome>,
}

impl DispatchSummary {
    /// Zero-recipient result. Not an error.
    pub fn empty() -> Self {
        Self {
            message: NO_RECIPIENTS_MESSAGE.to_string(),
            sent_count: 0,
            failure_count: 0,
            failure_histogram: FailureHistogram::new(),
            results: Vec::new(),
        }
    }
}

/// Count outcomes. Independent of outcome order.
pub fn summarize(results: Vec<DispatchOutcome>) -> DispatchSummary {
    let sent_count = results.iter().filter(|o| o.success).count();
    let failure_count = results.len() - sent_count;
    DispatchSummary {
        message: format!(
            "푸시 알림 발송 완료: 성공 {}건, 실패 {}건",
            sent_count, failure_count
        ),
        sent_count,
        failure_count,
        failure_histogram: failure_histogram(&results),
        results,
    }
}

pub fn failure_histogram(results: &[DispatchOutcome]) -> FailureHistogram {
    let mut histogram = FailureHistogram::new();
    for outcome in results.iter().filter(|o| !o.success) {
        *histogram.entry(outcome.failure_kind()).or_default() += 1;
    }
    histogram
}

/// Lowest subscription id among failures, so the sample is stable.
fn representative_failure(results: &[DispatchOutcome]) -> Option<&DispatchOutcome> {
    results
        .iter()
        .filter(|o| !o.success)
        .min_by(|a, b| a.subscription_id.cmp(&b.subscription_id))
}

/// What a dispatch was about, for the audit record and the log row.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub notification_type: NotificationType,
    pub farm_id: Option<String>,
    pub title: String,
    pub candidate_count: usize,
    pub audience_count: usize,
}

pub struct DispatchReporter {
    log_repo: Option<Arc<dyn DispatchLogRepository>>,
}

impl DispatchReporter {
    pub fn new(log_repo: Option<Arc<dyn DispatchLogRepository>>) -> Self {
        Self { log_repo }
    }

    pub async fn report(&self, results: Vec<DispatchOutcome>, ctx: &DispatchContext) -> DispatchSummary {
        let summary = summarize(results);
        emit_audit(&summary, ctx);
        self.persist(&summary, ctx).await;
        summary
    }

    /// Report a dispatch whose audience was empty.
    pub async fn report_empty(&self, ctx: &DispatchContext) -> DispatchSummary {
        let summary = DispatchSummary::empty();
        info!(
            target: AUDIT_TARGET,
            notification_type = %ctx.notification_type,
            farm_id = ctx.farm_id.as_deref().unwrap_or(""),
            candidates = ctx.candidate_count,
            "No eligible push subscribers"
        );
        self.persist(&summary, ctx).await;
        summary
    }

    async fn persist(&self, summary: &DispatchSummary, ctx: &DispatchContext) {
        let Some(repo) = &self.log_repo else {
            return;
        };
        let histogram = match serde_json::to_string(&summary.failure_histogram) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize failure histogram");
                "{}".to_string()
            }
        };
        let entry = DispatchLogDbModel {
            id: uuid::Uuid::new_v4().to_string(),
            notification_type: ctx.notification_type.to_string(),
            farm_id: ctx.farm_id.clone(),
            title: ctx.title.clone(),
            requested_count: ctx.candidate_count as i64,
            audience_count: ctx.audience_count as i64,
            sent_count: summary.sent_count as i64,
            failure_count: summary.failure_count as i64,
            failure_histogram: histogram,
            created_at: now_ms(),
        };
        if let Err(e) = repo.insert(&entry).await {
            warn!(error = %e, "Failed to persist dispatch log");
        }
    }
}

fn emit_audit(summary: &DispatchSummary, ctx: &DispatchContext) {
    if summary.failure_count > 0 {
        let histogram = format_histogram(&summary.failure_histogram);
        if let Some(sample) = representative_failure(&summary.results) {
            warn!(
                target: AUDIT_TARGET,
                notification_type = %ctx.notification_type,
                failures = summary.failure_count,
                histogram = %histogram,
                sample.subscription_id = %sample.subscription_id,
                sample.user_id = %sample.user_id,
                sample.error = sample.error.as_deref().unwrap_or(""),
                sample.status_code = ?sample.status_code,
                "Push dispatch had failures"
            );
        }
    }

    info!(
        target: AUDIT_TARGET,
        notification_type = %ctx.notification_type,
        farm_id = ctx.farm_id.as_deref().unwrap_or(""),
        candidates = ctx.candidate_count,
        audience = ctx.audience_count,
        sent = summary.sent_count,
        failed = summary.failure_count,
        "Push dispatch completed"
    );
}

fn format_histogram(histogram: &FailureHistogram) -> String {
    histogram
        .iter()
        .map(|(kind, count)| format!("{}={}", kind, count))
        .collect::<Vec<_>>()
        .join(",")
}

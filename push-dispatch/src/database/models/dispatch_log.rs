//! Dispatch log database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One persisted record per reported dispatch.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DispatchLogDbModel {
    pub id: String,
    pub notification_type: String,
    pub farm_id: Option<String>,
    pub title: String,
    /// Candidate subscriptions before preference filtering.
    pub requested_count: i64,
    /// Subscriptions that survived filtering.
    pub audience_count: i64,
    pub sent_count: i64,
    pub failure_count: i64,
    /// JSON object of failure kind to count.
    pub failure_histogram: String,
    pub created_at: i64,
}

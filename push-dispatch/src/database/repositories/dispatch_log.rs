//! Dispatch log repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::DispatchLogDbModel;

/// Persisted record of reported dispatches.
#[async_trait]
pub trait DispatchLogRepository: Send + Sync {
    async fn insert(&self, entry: &DispatchLogDbModel) -> Result<()>;
    async fn list_recent(&self, limit: i64) -> Result<Vec<DispatchLogDbModel>>;
    async fn cleanup_older_than(&self, cutoff_ms: i64) -> Result<u64>;
}

/// SQLx implementation of DispatchLogRepository.
pub struct SqlxDispatchLogRepository {
    pool: SqlitePool,
}

impl SqlxDispatchLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DispatchLogRepository for SqlxDispatchLogRepository {
    async fn insert(&self, entry: &DispatchLogDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_dispatch_log (
                id, notification_type, farm_id, title, requested_count, audience_count,
                sent_count, failure_count, failure_histogram, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.notification_type)
        .bind(&entry.farm_id)
        .bind(&entry.title)
        .bind(entry.requested_count)
        .bind(entry.audience_count)
        .bind(entry.sent_count)
        .bind(entry.failure_count)
        .bind(&entry.failure_histogram)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<DispatchLogDbModel>> {
        let rows = sqlx::query_as::<_, DispatchLogDbModel>(
            "SELECT * FROM notification_dispatch_log ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn cleanup_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notification_dispatch_log WHERE created_at < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

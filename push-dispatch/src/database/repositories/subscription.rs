//! Push subscription repository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::IN_CLAUSE_CHUNK;
use crate::database::models::{PushSubscriptionDbModel, SubscriptionKeys};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Subscription store.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<PushSubscriptionDbModel>;
    async fn find_by_user_device(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> Result<Option<PushSubscriptionDbModel>>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<PushSubscriptionDbModel>>;

    /// Every deliverable subscription (broadcast candidates).
    async fn list_active(&self) -> Result<Vec<PushSubscriptionDbModel>>;
    /// Deliverable subscriptions owned by any of `user_ids`.
    async fn list_active_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<PushSubscriptionDbModel>>;
    async fn count_active_for_user(&self, user_id: &str) -> Result<i64>;

    /// Insert or reactivate the row for (user, device).
    async fn upsert(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        keys: &SubscriptionKeys,
    ) -> Result<PushSubscriptionDbModel>;
    /// Soft delete. Returns whether an active row was deactivated.
    async fn soft_delete(&self, user_id: &str, device_id: Option<&str>) -> Result<bool>;
    /// Hard delete by id. Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Successful delivery: touch `last_used_at`, reset `fail_count`.
    async fn record_success(&self, id: &str) -> Result<()>;
    /// Transient delivery failure: bump `fail_count`, set `last_fail_at`.
    async fn record_failure(&self, id: &str) -> Result<()>;
    /// Soft-deactivate active rows with `fail_count >= threshold`.
    async fn deactivate_failing(&self, threshold: i64) -> Result<u64>;
}

/// SQLx implementation of SubscriptionRepository.
pub struct SqlxSubscriptionRepository {
    pool: SqlitePool,
}

impl SqlxSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SqlxSubscriptionRepository {
    async fn get(&self, id: &str) -> Result<PushSubscriptionDbModel> {
        sqlx::query_as::<_, PushSubscriptionDbModel>(
            "SELECT * FROM push_subscription WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("PushSubscription", id))
    }

    async fn find_by_user_device(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> Result<Option<PushSubscriptionDbModel>> {
        let row = sqlx::query_as::<_, PushSubscriptionDbModel>(
            "SELECT * FROM push_subscription WHERE user_id = ? AND device_id IS ?",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<PushSubscriptionDbModel>> {
        let rows = sqlx::query_as::<_, PushSubscriptionDbModel>(
            "SELECT * FROM push_subscription WHERE user_id = ? ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_active(&self) -> Result<Vec<PushSubscriptionDbModel>> {
        let rows = sqlx::query_as::<_, PushSubscriptionDbModel>(
            "SELECT * FROM push_subscription WHERE is_active = 1 AND deleted_at IS NULL ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_active_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<PushSubscriptionDbModel>> {
        let mut rows = Vec::new();
        for chunk in user_ids.chunks(IN_CLAUSE_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT * FROM push_subscription WHERE is_active = 1 AND deleted_at IS NULL AND user_id IN (",
            );
            let mut separated = qb.separated(", ");
            for user_id in chunk {
                separated.push_bind(user_id);
            }
            separated.push_unseparated(") ORDER BY created_at");

            let mut chunk_rows = qb
                .build_query_as::<PushSubscriptionDbModel>()
                .fetch_all(&self.pool)
                .await?;
            rows.append(&mut chunk_rows);
        }
        Ok(rows)
    }

    async fn count_active_for_user(&self, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM push_subscription WHERE user_id = ? AND is_active = 1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn upsert(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        keys: &SubscriptionKeys,
    ) -> Result<PushSubscriptionDbModel> {
        let id = retry_on_sqlite_busy("upsert_subscription", || async {
            let mut tx = self.pool.begin().await?;
            let now = now_ms();

            let existing: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM push_subscription WHERE user_id = ? AND device_id IS ?",
            )
            .bind(user_id)
            .bind(device_id)
            .fetch_optional(&mut *tx)
            .await?;

            let id = match existing {
                Some((id,)) => {
                    sqlx::query(
                        r#"
                        UPDATE push_subscription SET
                            endpoint = ?,
                            p256dh = ?,
                            auth = ?,
                            is_active = 1,
                            fail_count = 0,
                            last_fail_at = NULL,
                            deleted_at = NULL,
                            last_used_at = ?,
                            updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(&keys.endpoint)
                    .bind(&keys.p256dh)
                    .bind(&keys.auth)
                    .bind(now)
                    .bind(now)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                    id
                }
                None => {
                    let row = PushSubscriptionDbModel::new(
                        user_id,
                        device_id.map(str::to_string),
                        keys.clone(),
                    );
                    sqlx::query(
                        r#"
                        INSERT INTO push_subscription (
                            id, user_id, device_id, endpoint, p256dh, auth, is_active,
                            fail_count, last_used_at, last_fail_at, deleted_at, created_at, updated_at
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&row.id)
                    .bind(&row.user_id)
                    .bind(&row.device_id)
                    .bind(&row.endpoint)
                    .bind(&row.p256dh)
                    .bind(&row.auth)
                    .bind(row.is_active)
                    .bind(row.fail_count)
                    .bind(row.last_used_at)
                    .bind(row.last_fail_at)
                    .bind(row.deleted_at)
                    .bind(row.created_at)
                    .bind(row.updated_at)
                    .execute(&mut *tx)
                    .await?;
                    row.id
                }
            };

            tx.commit().await?;
            Ok(id)
        })
        .await?;

        self.get(&id).await
    }

    async fn soft_delete(&self, user_id: &str, device_id: Option<&str>) -> Result<bool> {
        retry_on_sqlite_busy("soft_delete_subscription", || async {
            let now = now_ms();
            let result = sqlx::query(
                r#"
                UPDATE push_subscription SET
                    is_active = 0,
                    deleted_at = ?,
                    fail_count = 0,
                    updated_at = ?
                WHERE user_id = ? AND device_id IS ? AND is_active = 1
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(user_id)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        retry_on_sqlite_busy("delete_subscription", || async {
            let result = sqlx::query("DELETE FROM push_subscription WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn record_success(&self, id: &str) -> Result<()> {
        retry_on_sqlite_busy("record_subscription_success", || async {
            let now = now_ms();
            sqlx::query(
                "UPDATE push_subscription SET last_used_at = ?, fail_count = 0, updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn record_failure(&self, id: &str) -> Result<()> {
        retry_on_sqlite_busy("record_subscription_failure", || async {
            let now = now_ms();
            sqlx::query(
                "UPDATE push_subscription SET fail_count = fail_count + 1, last_fail_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn deactivate_failing(&self, threshold: i64) -> Result<u64> {
        retry_on_sqlite_busy("deactivate_failing_subscriptions", || async {
            let now = now_ms();
            let result = sqlx::query(
                r#"
                UPDATE push_subscription SET
                    is_active = 0,
                    deleted_at = ?,
                    updated_at = ?
                WHERE is_active = 1 AND fail_count >= ?
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(threshold)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

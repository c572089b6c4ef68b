//! Notification preference repository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::IN_CLAUSE_CHUNK;
use crate::database::models::NotificationPreferenceDbModel;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Preference store.
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<NotificationPreferenceDbModel>;
    /// Rows with `is_active = true` for exactly these users.
    async fn list_active_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<NotificationPreferenceDbModel>>;
    /// Create the default row if absent, otherwise mark it active.
    async fn ensure_active(&self, user_id: &str) -> Result<NotificationPreferenceDbModel>;
    async fn set_active(&self, user_id: &str, is_active: bool) -> Result<()>;
    async fn update(&self, preference: &NotificationPreferenceDbModel) -> Result<()>;
}

/// SQLx implementation of PreferenceRepository.
pub struct SqlxPreferenceRepository {
    pool: SqlitePool,
}

impl SqlxPreferenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceRepository for SqlxPreferenceRepository {
    async fn get(&self, user_id: &str) -> Result<NotificationPreferenceDbModel> {
        sqlx::query_as::<_, NotificationPreferenceDbModel>(
            "SELECT * FROM notification_preference WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("NotificationPreference", user_id))
    }

    async fn list_active_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<NotificationPreferenceDbModel>> {
        let mut rows = Vec::new();
        for chunk in user_ids.chunks(IN_CLAUSE_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT * FROM notification_preference WHERE is_active = 1 AND user_id IN (",
            );
            let mut separated = qb.separated(", ");
            for user_id in chunk {
                separated.push_bind(user_id);
            }
            separated.push_unseparated(")");

            let mut chunk_rows = qb
                .build_query_as::<NotificationPreferenceDbModel>()
                .fetch_all(&self.pool)
                .await?;
            rows.append(&mut chunk_rows);
        }
        Ok(rows)
    }

    async fn ensure_active(&self, user_id: &str) -> Result<NotificationPreferenceDbModel> {
        let row = NotificationPreferenceDbModel::new(user_id);
        sqlx::query(
            r#"
            INSERT INTO notification_preference (
                user_id, visitor_alerts, notice_alerts, emergency_alerts, maintenance_alerts,
                is_active, delivery_method, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                is_active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.user_id)
        .bind(row.visitor_alerts)
        .bind(row.notice_alerts)
        .bind(row.emergency_alerts)
        .bind(row.maintenance_alerts)
        .bind(row.is_active)
        .bind(&row.delivery_method)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        self.get(user_id).await
    }

    async fn set_active(&self, user_id: &str, is_active: bool) -> Result<()> {
        sqlx::query(
            "UPDATE notification_preference SET is_active = ?, updated_at = ? WHERE user_id = ?",
        )
        .bind(is_active)
        .bind(now_ms())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, preference: &NotificationPreferenceDbModel) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_preference SET
                visitor_alerts = ?,
                notice_alerts = ?,
                emergency_alerts = ?,
                maintenance_alerts = ?,
                is_active = ?,
                delivery_method = ?,
                updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(preference.visitor_alerts)
        .bind(preference.notice_alerts)
        .bind(preference.emergency_alerts)
        .bind(preference.maintenance_alerts)
        .bind(preference.is_active)
        .bind(&preference.delivery_method)
        .bind(now_ms())
        .bind(&preference.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

//! Farm membership repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::time::now_ms;

/// Which users belong to a farm.
#[async_trait]
pub trait FarmMemberRepository: Send + Sync {
    async fn list_user_ids(&self, farm_id: &str) -> Result<Vec<String>>;
    async fn add_member(&self, farm_id: &str, user_id: &str) -> Result<()>;
    async fn remove_member(&self, farm_id: &str, user_id: &str) -> Result<()>;
}

/// SQLx implementation of FarmMemberRepository.
pub struct SqlxFarmMemberRepository {
    pool: SqlitePool,
}

impl SqlxFarmMemberRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FarmMemberRepository for SqlxFarmMemberRepository {
    async fn list_user_ids(&self, farm_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT user_id FROM farm_member WHERE farm_id = ? ORDER BY user_id")
                .bind(farm_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    async fn add_member(&self, farm_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO farm_member (farm_id, user_id, created_at) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(farm_id)
        .bind(user_id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_member(&self, farm_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM farm_member WHERE farm_id = ? AND user_id = ?")
            .bind(farm_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

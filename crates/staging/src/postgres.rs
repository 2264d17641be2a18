use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::{Result, StagedEntry, StagingCache, UserId};

/// PostgreSQL-backed staging cache.
///
/// Each record is one row in `cart_staging` with its entries stored as a
/// JSONB array, so order and duplicate products are preserved.
#[derive(Clone)]
pub struct PostgresStagingCache {
    pool: PgPool,
}

impl PostgresStagingCache {
    /// Creates a new PostgreSQL staging cache.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StagingCache for PostgresStagingCache {
    async fn put(&self, user_id: UserId, entries: Vec<StagedEntry>) -> Result<()> {
        let entries_json = serde_json::to_value(&entries)?;

        sqlx::query(
            r#"
            INSERT INTO cart_staging (user_id, entries, staged_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                entries = EXCLUDED.entries,
                staged_at = EXCLUDED.staged_at
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(entries_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!(%user_id, entries = entries.len(), "staged cart");
        Ok(())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<Vec<StagedEntry>>> {
        let entries_json: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT entries FROM cart_staging WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        match entries_json {
            Some(json) => Ok(Some(serde_json::from_value(json).inspect_err(|err| {
                tracing::warn!(%user_id, error = %err, "unreadable staging record");
            })?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, user_id: UserId) -> Result<()> {
        let result = sqlx::query("DELETE FROM cart_staging WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        tracing::debug!(%user_id, removed = result.rows_affected(), "cleared staging record");
        Ok(())
    }
}

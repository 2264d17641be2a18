use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CartLineItem, CartStoreError, LineItemId, ProductId, Result, UserId,
    store::{CartStore, validate_items_for_insert},
};

/// PostgreSQL-backed cart store implementation.
#[derive(Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
}

impl PostgresCartStore {
    /// Creates a new PostgreSQL cart store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_item(row: PgRow) -> Result<CartLineItem> {
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity)
            .map_err(|_| CartStoreError::InvalidRow(format!("quantity {quantity} out of range")))?;

        Ok(CartLineItem {
            id: LineItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<Option<DateTime<Utc>>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl CartStore for PostgresCartStore {
    async fn list_items(&self, user_id: UserId) -> Result<Vec<CartLineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, quantity, created_at, updated_at
            FROM carts
            WHERE user_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(%user_id, rows = result.rows_affected(), "deleted cart items");
        Ok(result.rows_affected())
    }

    async fn bulk_insert(&self, items: Vec<CartLineItem>) -> Result<()> {
        validate_items_for_insert(&items)?;

        let mut tx = self.pool.begin().await?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO carts (id, user_id, product_id, quantity, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.user_id.as_uuid())
            .bind(item.product_id.as_str())
            .bind(i64::from(item.quantity))
            .bind(item.created_at)
            .bind(item.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("carts_pkey")
                {
                    return CartStoreError::DuplicateItem(item.id);
                }
                CartStoreError::Database(e)
            })?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_quantity(
        &self,
        user_id: UserId,
        item_id: LineItemId,
        quantity: u32,
    ) -> Result<Option<CartLineItem>> {
        if quantity == 0 {
            return Err(CartStoreError::InvalidQuantity(item_id));
        }

        let row = sqlx::query(
            r#"
            UPDATE carts
            SET quantity = $1, updated_at = $2
            WHERE id = $3 AND user_id = $4
            RETURNING id, user_id, product_id, quantity, created_at, updated_at
            "#,
        )
        .bind(i64::from(quantity))
        .bind(Utc::now())
        .bind(item_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn remove_item(&self, user_id: UserId, item_id: LineItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM carts WHERE id = $1 AND user_id = $2")
            .bind(item_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        tracing::debug!(%user_id, %item_id, removed = result.rows_affected(), "removed cart item");
        Ok(result.rows_affected() > 0)
    }
}

use std::collections::HashSet;

use async_trait::async_trait;

use crate::{CartLineItem, CartStoreError, LineItemId, Result, UserId};

/// Core trait for primary cart storage.
///
/// Implementations are the durable source of truth for cart line items.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Lists every line item of a user, oldest first.
    ///
    /// Items created in the same instant keep their insertion order.
    async fn list_items(&self, user_id: UserId) -> Result<Vec<CartLineItem>>;

    /// Deletes every line item of a user in a single atomic operation.
    ///
    /// Returns the number of rows removed.
    async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64>;

    /// Inserts a batch of line items atomically - either all rows are
    /// written or none are.
    async fn bulk_insert(&self, items: Vec<CartLineItem>) -> Result<()>;

    /// Sets the quantity of one of the user's line items and stamps
    /// `updated_at`.
    ///
    /// Returns `None` if the user has no such line item.
    async fn update_quantity(
        &self,
        user_id: UserId,
        item_id: LineItemId,
        quantity: u32,
    ) -> Result<Option<CartLineItem>>;

    /// Removes one of the user's line items.
    ///
    /// Returns false if the user has no such line item.
    async fn remove_item(&self, user_id: UserId, item_id: LineItemId) -> Result<bool>;
}

/// Validates a batch before it is handed to storage.
///
/// The batch must be non-empty, every quantity positive and every id
/// unique within the batch.
pub fn validate_items_for_insert(items: &[CartLineItem]) -> Result<()> {
    if items.is_empty() {
        return Err(CartStoreError::InvalidBatch(
            "Cannot insert empty item list".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            return Err(CartStoreError::InvalidBatch(format!(
                "Quantity must be positive for product {}",
                item.product_id
            )));
        }
        if !seen.insert(item.id) {
            return Err(CartStoreError::DuplicateItem(item.id));
        }
    }

    Ok(())
}

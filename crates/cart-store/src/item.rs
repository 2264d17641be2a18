use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LineItemId, ProductId, UserId};

/// One product line in a user's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub id: LineItemId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CartLineItem {
    /// Creates a fresh line item with a new id, stamped with the current time.
    pub fn new(user_id: UserId, product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self::new_at(user_id, product_id, quantity, Utc::now())
    }

    /// Creates a fresh line item stamped with the given time.
    pub fn new_at(
        user_id: UserId,
        product_id: impl Into<ProductId>,
        quantity: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LineItemId::new(),
            user_id,
            product_id: product_id.into(),
            quantity,
            created_at,
            updated_at: None,
        }
    }
}

use thiserror::Error;

use crate::LineItemId;

/// Errors that can occur when interacting with the primary cart store.
#[derive(Debug, Error)]
pub enum CartStoreError {
    /// The batch handed to a bulk insert was rejected before touching storage.
    #[error("Invalid insert batch: {0}")]
    InvalidBatch(String),

    /// A line item with this id already exists.
    #[error("Duplicate line item: {0}")]
    DuplicateItem(LineItemId),

    /// A quantity of zero was given for this line item.
    #[error("Quantity must be positive for line item {0}")]
    InvalidQuantity(LineItemId),

    /// A stored row could not be mapped back to a line item.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// The store could not be reached.
    #[error("Cart store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl CartStoreError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CartStoreError::Unavailable(_) => true,
            CartStoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Result type for cart store operations.
pub type Result<T> = std::result::Result<T, CartStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_transient() {
        assert!(CartStoreError::Unavailable("down".to_string()).is_transient());
        assert!(CartStoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn validation_errors_are_not_transient() {
        assert!(!CartStoreError::InvalidBatch("empty".to_string()).is_transient());
        assert!(!CartStoreError::DuplicateItem(LineItemId::new()).is_transient());
        assert!(!CartStoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }
}

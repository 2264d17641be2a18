//! Checkout error types.

use cart_store::CartStoreError;
use common::{LineItemId, UserId};
use staging::StagingError;
use thiserror::Error;

use crate::state::CheckoutState;

/// The step of a commit or rollback an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Waiting for the per-user lock.
    Lock,
    /// Checking whether a staging record already exists.
    StagingCheck,
    /// Listing items in the primary store.
    PrimaryList,
    /// Writing the snapshot to the staging cache.
    StageWrite,
    /// Deleting the user's items from the primary store.
    PrimaryDelete,
    /// Adding, changing or removing a single line item.
    PrimaryWrite,
    /// Reading the staging record.
    StagingRead,
    /// Inserting restored items into the primary store.
    PrimaryInsert,
    /// Deleting the staging record.
    StagingClear,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lock => "lock",
            Stage::StagingCheck => "staging-check",
            Stage::PrimaryList => "primary-list",
            Stage::StageWrite => "stage-write",
            Stage::PrimaryDelete => "primary-delete",
            Stage::PrimaryWrite => "primary-write",
            Stage::StagingRead => "staging-read",
            Stage::PrimaryInsert => "primary-insert",
            Stage::StagingClear => "staging-clear",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad classification of a checkout error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any mutation; nothing changed.
    Precondition,
    /// One store changed and the other did not.
    PartialFailure,
    /// Infrastructure was unreachable or slow; nothing changed.
    Transient,
    /// Malformed data or a broken invariant.
    Internal,
}

/// Errors that can occur during commit and rollback.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// A staging record already exists for the user.
    #[error("Cart of user {user_id} is already staged")]
    AlreadyStaged { user_id: UserId },

    /// The user's cart is empty.
    #[error("Cart of user {user_id} has no items to commit")]
    NothingToCommit { user_id: UserId },

    /// No staging record exists for the user.
    #[error("No staged cart for user {user_id}")]
    NoStagedData { user_id: UserId },

    /// There is no commit with an unconfirmed delete to resume.
    #[error("No unfinished commit for user {user_id}")]
    NoPendingCommit { user_id: UserId },

    #[error("Cart of user {user_id} is {state} and cannot be edited until rolled back")]
    CartLocked {
        user_id: UserId,
        state: CheckoutState,
    },

    #[error("Cart of user {user_id} no longer matches the staged snapshot")]
    CartChanged { user_id: UserId },

    #[error("Line item {item_id} not found in cart of user {user_id}")]
    ItemNotFound {
        user_id: UserId,
        item_id: LineItemId,
    },

    #[error("Quantity must be positive")]
    InvalidQuantity { user_id: UserId },

    /// The cart was staged but deleting it from the primary store failed.
    #[error("Cart of user {user_id} was staged but not deleted from the primary store: {source}")]
    CommitPartialFailure {
        user_id: UserId,
        source: CartStoreError,
    },

    /// Restoring items into the primary store failed; the staging record is intact.
    #[error("Failed to restore cart of user {user_id}: {source}")]
    RollbackInsertFailed {
        user_id: UserId,
        source: CartStoreError,
    },

    /// Items were restored but the staging record could not be cleared.
    #[error("Cart of user {user_id} was restored but its staging record was not cleared: {source}")]
    StagingClearFailed {
        user_id: UserId,
        source: StagingError,
    },

    /// The context deadline expired during a step.
    #[error("Operation timed out at stage '{stage}'")]
    OperationTimeout { stage: Stage, partial_failure: bool },

    /// The primary store failed before anything was changed.
    #[error("Cart store error at stage '{stage}': {source}")]
    Store {
        stage: Stage,
        source: CartStoreError,
    },

    /// The staging cache failed before anything was changed.
    #[error("Staging cache error at stage '{stage}': {source}")]
    Staging { stage: Stage, source: StagingError },

    /// The staging record violates its invariants.
    #[error("Corrupt staging record for user {user_id}: {reason}")]
    CorruptStagingRecord { user_id: UserId, reason: String },

    #[error("Removed {removed} rows for user {user_id} but staged {staged}")]
    DeleteCountMismatch {
        user_id: UserId,
        staged: usize,
        removed: u64,
    },
}

impl CheckoutError {
    pub(crate) fn timeout(stage: Stage, partial_failure: bool) -> Self {
        CheckoutError::OperationTimeout {
            stage,
            partial_failure,
        }
    }

    /// Returns the stage the error was raised in.
    pub fn stage(&self) -> Stage {
        match self {
            CheckoutError::AlreadyStaged { .. } => Stage::StagingCheck,
            CheckoutError::NothingToCommit { .. } => Stage::PrimaryList,
            CheckoutError::NoStagedData { .. } => Stage::StagingRead,
            CheckoutError::NoPendingCommit { .. } => Stage::PrimaryDelete,
            CheckoutError::CartLocked { .. } => Stage::StagingCheck,
            CheckoutError::CartChanged { .. } => Stage::PrimaryList,
            CheckoutError::ItemNotFound { .. } | CheckoutError::InvalidQuantity { .. } => {
                Stage::PrimaryWrite
            }
            CheckoutError::CommitPartialFailure { .. } => Stage::PrimaryDelete,
            CheckoutError::RollbackInsertFailed { .. } => Stage::PrimaryInsert,
            CheckoutError::StagingClearFailed { .. } => Stage::StagingClear,
            CheckoutError::OperationTimeout { stage, .. } => *stage,
            CheckoutError::Store { stage, .. } => *stage,
            CheckoutError::Staging { stage, .. } => *stage,
            CheckoutError::CorruptStagingRecord { .. } => Stage::StagingRead,
            CheckoutError::DeleteCountMismatch { .. } => Stage::PrimaryDelete,
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::AlreadyStaged { .. }
            | CheckoutError::NothingToCommit { .. }
            | CheckoutError::NoStagedData { .. }
            | CheckoutError::NoPendingCommit { .. }
            | CheckoutError::CartLocked { .. }
            | CheckoutError::CartChanged { .. }
            | CheckoutError::ItemNotFound { .. }
            | CheckoutError::InvalidQuantity { .. } => ErrorKind::Precondition,
            CheckoutError::CommitPartialFailure { .. }
            | CheckoutError::RollbackInsertFailed { .. }
            | CheckoutError::StagingClearFailed { .. } => ErrorKind::PartialFailure,
            CheckoutError::OperationTimeout {
                partial_failure, ..
            } => {
                if *partial_failure {
                    ErrorKind::PartialFailure
                } else {
                    ErrorKind::Transient
                }
            }
            CheckoutError::Store { source, .. } if source.is_transient() => ErrorKind::Transient,
            CheckoutError::Staging { source, .. } if source.is_transient() => {
                ErrorKind::Transient
            }
            CheckoutError::Store { .. }
            | CheckoutError::Staging { .. }
            | CheckoutError::CorruptStagingRecord { .. }
            | CheckoutError::DeleteCountMismatch { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller may retry, possibly after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::PartialFailure
        )
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

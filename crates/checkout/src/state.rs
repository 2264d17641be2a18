//! Per-user checkout state machine.

use serde::{Deserialize, Serialize};

/// Where a user's cart sits between the primary store and the staging cache.
///
/// State transitions:
/// ```text
/// Active ──commit──► Staged ──rollback──► Active
///                      │
///   commit's delete fails
///                      ▼
///           CommitPartialFailure ──rollback / resume_commit──► Active / Staged
///
/// Staged ──rollback, clear fails──► RestoredPendingClear ──rollback──► Active
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CheckoutState {
    /// Items live in the primary store; nothing is staged.
    #[default]
    Active,

    /// Items live in the staging cache only.
    Staged,

    /// Items were staged but may still be in the primary store.
    CommitPartialFailure,

    /// Items were restored but the staging record was not cleared.
    RestoredPendingClear,
}

impl CheckoutState {
    /// Returns true if a commit may start from this state.
    pub fn can_commit(&self) -> bool {
        matches!(self, CheckoutState::Active)
    }

    /// Returns true if a rollback has work to do in this state.
    pub fn can_rollback(&self) -> bool {
        !matches!(self, CheckoutState::Active)
    }

    /// Returns true if a previous operation stopped between the two stores.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            CheckoutState::CommitPartialFailure | CheckoutState::RestoredPendingClear
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Active => "Active",
            CheckoutState::Staged => "Staged",
            CheckoutState::CommitPartialFailure => "CommitPartialFailure",
            CheckoutState::RestoredPendingClear => "RestoredPendingClear",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

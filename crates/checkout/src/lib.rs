//! Cart checkout staging.
//!
//! Committing a cart moves every line item of a user from the primary
//! store into the staging cache and clears them from the primary store.
//! Rolling back restores the staged items and clears the staging record.
//!
//! The two stores fail independently and share no transaction, so the
//! coordinator runs each operation as a short saga:
//!
//! Commit:   check no stage exists → list items → write stage → delete items
//! Rollback: read stage → insert restored items → clear stage
//!
//! A failure after one side has changed is reported as a partial failure
//! naming the stage, never as success. Operations on the same user are
//! serialized by a per-user lock; different users never contend.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod state;

pub use config::CheckoutConfig;
pub use context::OpContext;
pub use coordinator::{CheckoutCoordinator, CommitReceipt, RollbackOutcome, RollbackReceipt};
pub use error::{CheckoutError, ErrorKind, Result, Stage};
pub use lock::{UserLockGuard, UserLocks};
pub use state::CheckoutState;

use async_trait::async_trait;

use crate::{Result, StagedEntry, UserId};

/// Key-value store for staged cart snapshots, keyed by user.
///
/// Entries are returned exactly as they were put: same order, duplicates
/// included. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StagingCache: Send + Sync {
    /// Stores the snapshot for a user, replacing any previous one.
    async fn put(&self, user_id: UserId, entries: Vec<StagedEntry>) -> Result<()>;

    /// Retrieves the snapshot for a user.
    ///
    /// Returns None if nothing is staged.
    async fn get(&self, user_id: UserId) -> Result<Option<Vec<StagedEntry>>>;

    /// Removes the snapshot for a user. Removing a missing record is not
    /// an error.
    async fn delete(&self, user_id: UserId) -> Result<()>;
}

//! Keyed lock serializing operations on the same user.

use std::sync::Arc;

use common::UserId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<UserId, Arc<Mutex<()>>>;

/// A table of per-user async mutexes.
///
/// Entries are created on first use and removed when the last holder or
/// waiter lets go, so the table only holds users with operations in flight.
#[derive(Debug, Clone, Default)]
pub struct UserLocks {
    table: Arc<LockTable>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `user_id`.
    ///
    /// Dropping the returned future before it resolves leaves no lock held.
    pub async fn lock(&self, user_id: UserId) -> UserLockGuard {
        let mutex = self.table.entry(user_id).or_default().clone();
        let mut pending = PendingEntry {
            table: &self.table,
            user_id,
            mutex: Some(mutex.clone()),
        };
        let guard = mutex.lock_owned().await;
        pending.mutex = None;

        UserLockGuard {
            user_id,
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    /// Number of users with a live lock entry.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Removes the entry for `user_id` if only the table still references it.
fn reclaim(table: &LockTable, user_id: UserId) {
    table.remove_if(&user_id, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Cleans up after a waiter whose future was dropped mid-wait.
struct PendingEntry<'a> {
    table: &'a LockTable,
    user_id: UserId,
    mutex: Option<Arc<Mutex<()>>>,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.mutex.take().is_some() {
            reclaim(self.table, self.user_id);
        }
    }
}

/// Exclusive access to one user; released on drop.
#[derive(Debug)]
pub struct UserLockGuard {
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl UserLockGuard {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Drop for UserLockGuard {
    fn drop(&mut self) {
        // Release before reclaiming so the guard's own reference is gone
        drop(self.guard.take());
        reclaim(&self.table, self.user_id);
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use crate::{Result, StagedEntry, StagingCache, StagingError, UserId};

#[derive(Debug, Default)]
struct Faults {
    fail_on_put: AtomicBool,
    fail_on_get: AtomicBool,
    fail_on_delete: AtomicBool,
    delete_failures_remaining: AtomicU32,
    latency_ms: AtomicU64,
}

/// In-process staging cache backed by a moka async cache.
///
/// Records never expire. Failures and latency can be injected per
/// operation for testing.
#[derive(Clone)]
pub struct InMemoryStagingCache {
    records: Cache<UserId, Arc<Vec<StagedEntry>>>,
    faults: Arc<Faults>,
}

impl Default for InMemoryStagingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStagingCache {
    /// Creates a cache whose records live until deleted.
    pub fn new() -> Self {
        Self {
            records: Cache::builder().build(),
            faults: Arc::default(),
        }
    }

    /// Returns the number of staged records.
    pub async fn record_count(&self) -> u64 {
        self.records.run_pending_tasks().await;
        self.records.entry_count()
    }

    /// Returns true if a record is staged for the user.
    pub fn contains(&self, user_id: UserId) -> bool {
        self.records.contains_key(&user_id)
    }

    /// Configures `put` to fail.
    pub fn set_fail_on_put(&self, fail: bool) {
        self.faults.fail_on_put.store(fail, Ordering::SeqCst);
    }

    /// Configures `get` to fail.
    pub fn set_fail_on_get(&self, fail: bool) {
        self.faults.fail_on_get.store(fail, Ordering::SeqCst);
    }

    /// Configures `delete` to fail until switched off.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.faults.fail_on_delete.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` deletes fail, then lets them succeed.
    pub fn fail_next_deletes(&self, count: u32) {
        self.faults
            .delete_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    /// Delays every operation by the given duration before it runs.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.faults.latency_ms.store(millis, Ordering::SeqCst);
    }

    async fn simulate_latency(&self) {
        let millis = self.faults.latency_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StagingError::Unavailable(format!("{op} rejected")));
        }
        Ok(())
    }

    fn take_delete_failure(&self) -> bool {
        self.faults
            .delete_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StagingCache for InMemoryStagingCache {
    async fn put(&self, user_id: UserId, entries: Vec<StagedEntry>) -> Result<()> {
        self.simulate_latency().await;
        Self::check(&self.faults.fail_on_put, "put")?;

        tracing::debug!(%user_id, entries = entries.len(), "staged cart in memory");
        self.records.insert(user_id, Arc::new(entries)).await;
        Ok(())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<Vec<StagedEntry>>> {
        self.simulate_latency().await;
        Self::check(&self.faults.fail_on_get, "get")?;

        Ok(self
            .records
            .get(&user_id)
            .await
            .map(|entries| entries.as_ref().clone()))
    }

    async fn delete(&self, user_id: UserId) -> Result<()> {
        self.simulate_latency().await;
        Self::check(&self.faults.fail_on_delete, "delete")?;
        if self.take_delete_failure() {
            tracing::debug!(%user_id, "injected staging delete failure");
            return Err(StagingError::Unavailable("delete rejected".to_string()));
        }

        self.records.invalidate(&user_id).await;
        tracing::debug!(%user_id, "cleared in-memory staging record");
        Ok(())
    }
}

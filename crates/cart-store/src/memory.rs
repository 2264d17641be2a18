use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    CartLineItem, CartStoreError, LineItemId, Result, UserId,
    store::{CartStore, validate_items_for_insert},
};

#[derive(Debug, Default)]
struct Faults {
    fail_on_list: AtomicBool,
    fail_on_delete: AtomicBool,
    fail_on_insert: AtomicBool,
    latency_ms: AtomicU64,
    delete_latency_ms: AtomicU64,
    insert_latency_ms: AtomicU64,
    insert_stall_ms: AtomicU64,
}

/// In-memory cart store implementation for testing.
///
/// Provides the same interface as the PostgreSQL implementation. Each
/// operation can be made to fail or stall so callers can exercise their
/// failure paths.
#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    items: Arc<RwLock<Vec<CartLineItem>>>,
    faults: Arc<Faults>,
}

impl InMemoryCartStore {
    /// Creates a new empty in-memory cart store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of line items across all users.
    pub async fn item_count(&self) -> usize {
        self.items.read().await.len()
    }

    /// Clears all line items.
    pub async fn clear(&self) {
        self.items.write().await.clear();
    }

    /// Configures `list_items` to fail.
    pub fn set_fail_on_list(&self, fail: bool) {
        self.faults.fail_on_list.store(fail, Ordering::SeqCst);
    }

    /// Configures `delete_all_for_user` to fail.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.faults.fail_on_delete.store(fail, Ordering::SeqCst);
    }

    /// Configures `bulk_insert` to fail.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.faults.fail_on_insert.store(fail, Ordering::SeqCst);
    }

    /// Delays every operation by the given duration before it runs.
    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(as_millis(latency), Ordering::SeqCst);
    }

    /// Delays only `delete_all_for_user`, on top of any general latency.
    pub fn set_delete_latency(&self, latency: Duration) {
        self.faults
            .delete_latency_ms
            .store(as_millis(latency), Ordering::SeqCst);
    }

    /// Delays only `bulk_insert`, before anything is written.
    pub fn set_insert_latency(&self, latency: Duration) {
        self.faults
            .insert_latency_ms
            .store(as_millis(latency), Ordering::SeqCst);
    }

    /// Makes `bulk_insert` stall after its rows are written, so a caller
    /// giving up on it cannot tell whether the insert landed.
    pub fn set_insert_stall(&self, stall: Duration) {
        self.faults
            .insert_stall_ms
            .store(as_millis(stall), Ordering::SeqCst);
    }

    async fn simulate_latency(&self) {
        sleep_millis(self.faults.latency_ms.load(Ordering::SeqCst)).await;
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(CartStoreError::Unavailable(format!("{op} rejected")));
        }
        Ok(())
    }
}

fn as_millis(latency: Duration) -> u64 {
    u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)
}

async fn sleep_millis(millis: u64) {
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn list_items(&self, user_id: UserId) -> Result<Vec<CartLineItem>> {
        self.simulate_latency().await;
        Self::check(&self.faults.fail_on_list, "list")?;

        let store = self.items.read().await;
        Ok(store
            .iter()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64> {
        self.simulate_latency().await;
        sleep_millis(self.faults.delete_latency_ms.load(Ordering::SeqCst)).await;
        Self::check(&self.faults.fail_on_delete, "delete")?;

        let mut store = self.items.write().await;
        let before = store.len();
        store.retain(|item| item.user_id != user_id);
        Ok((before - store.len()) as u64)
    }

    async fn bulk_insert(&self, items: Vec<CartLineItem>) -> Result<()> {
        self.simulate_latency().await;
        sleep_millis(self.faults.insert_latency_ms.load(Ordering::SeqCst)).await;
        Self::check(&self.faults.fail_on_insert, "insert")?;
        validate_items_for_insert(&items)?;

        {
            let mut store = self.items.write().await;

            // Primary key simulation: reject the whole batch on any clash
            if let Some(existing) = items
                .iter()
                .find(|new| store.iter().any(|item| item.id == new.id))
            {
                return Err(CartStoreError::DuplicateItem(existing.id));
            }

            store.extend(items);
        }

        sleep_millis(self.faults.insert_stall_ms.load(Ordering::SeqCst)).await;
        Ok(())
    }

    async fn update_quantity(
        &self,
        user_id: UserId,
        item_id: LineItemId,
        quantity: u32,
    ) -> Result<Option<CartLineItem>> {
        self.simulate_latency().await;
        if quantity == 0 {
            return Err(CartStoreError::InvalidQuantity(item_id));
        }

        let mut store = self.items.write().await;
        Ok(store
            .iter_mut()
            .find(|item| item.id == item_id && item.user_id == user_id)
            .map(|item| {
                item.quantity = quantity;
                item.updated_at = Some(Utc::now());
                item.clone()
            }))
    }

    async fn remove_item(&self, user_id: UserId, item_id: LineItemId) -> Result<bool> {
        self.simulate_latency().await;

        let mut store = self.items.write().await;
        let before = store.len();
        store.retain(|item| !(item.id == item_id && item.user_id == user_id));
        Ok(store.len() < before)
    }
}

//! Checkout coordinator for staging carts across two stores.

use std::collections::HashSet;

use cart_store::{CartLineItem, CartStore, CartStoreError};
use chrono::Utc;
use common::{LineItemId, ProductId, UserId};
use dashmap::DashMap;
use staging::{StagedEntry, StagingCache, StagingError};

use crate::config::CheckoutConfig;
use crate::context::OpContext;
use crate::error::{CheckoutError, ErrorKind, Result, Stage};
use crate::lock::{UserLockGuard, UserLocks};
use crate::state::CheckoutState;

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub user_id: UserId,
    /// The snapshot now held by the staging cache.
    pub staged: Vec<StagedEntry>,
    /// Rows removed from the primary store.
    pub removed: u64,
}

/// What a successful rollback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Staged items were inserted and the staging record cleared.
    Restored,
    /// A previous rollback had restored the items; only the clear was retried.
    ClearRetried,
    /// A previous commit never removed the items, so only the stage was dropped.
    StageDiscarded,
}

/// Outcome of a successful rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReceipt {
    pub user_id: UserId,
    pub outcome: RollbackOutcome,
    /// The user's items in the primary store after the rollback.
    pub items: Vec<CartLineItem>,
}

/// A step whose effect on the primary store or staging cache is not confirmed.
///
/// Only read or written while the user's lock is held.
#[derive(Debug, Clone)]
enum Unconfirmed {
    /// Commit staged the snapshot but its delete failed or timed out.
    Delete { snapshot: Vec<CartLineItem> },
    /// Rollback's insert of these exact rows failed or timed out.
    Insert { items: Vec<CartLineItem> },
    /// Rollback inserted these rows but could not clear the staging record.
    Clear { items: Vec<CartLineItem> },
}

impl Unconfirmed {
    fn state(&self) -> CheckoutState {
        match self {
            Unconfirmed::Delete { .. } => CheckoutState::CommitPartialFailure,
            Unconfirmed::Insert { .. } => CheckoutState::Staged,
            Unconfirmed::Clear { .. } => CheckoutState::RestoredPendingClear,
        }
    }
}

enum ClearFailure {
    TimedOut,
    Failed(StagingError),
}

/// Moves carts between the primary store and the staging cache.
///
/// Commit and rollback for one user are serialized by a per-user lock held
/// for the whole operation. Each step is bounded by the caller's
/// [`OpContext`] deadline.
pub struct CheckoutCoordinator<C, S>
where
    C: CartStore,
    S: StagingCache,
{
    store: C,
    staging: S,
    locks: UserLocks,
    unconfirmed: DashMap<UserId, Unconfirmed>,
    config: CheckoutConfig,
}

impl<C, S> CheckoutCoordinator<C, S>
where
    C: CartStore,
    S: StagingCache,
{
    /// Creates a new checkout coordinator.
    pub fn new(store: C, staging: S, config: CheckoutConfig) -> Self {
        Self {
            store,
            staging,
            locks: UserLocks::new(),
            unconfirmed: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn staging(&self) -> &S {
        &self.staging
    }

    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    /// A context expiring after the configured operation timeout.
    pub fn default_context(&self) -> OpContext {
        OpContext::with_timeout(self.config.op_timeout)
    }

    /// Moves every line item of the user into the staging cache.
    ///
    /// Fails with `AlreadyStaged` if a staging record exists and with
    /// `NothingToCommit` if the cart is empty; neither changes anything.
    /// If the staging write fails the primary store is untouched. If the
    /// delete fails after the write, `CommitPartialFailure` is returned and
    /// the caller may [`resume_commit`](Self::resume_commit) or roll back.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn commit(&self, ctx: &OpContext, user_id: UserId) -> Result<CommitReceipt> {
        metrics::counter!("checkout_commits_total").increment(1);
        let started = std::time::Instant::now();

        let result = self.run_commit(ctx, user_id).await;

        metrics::histogram!("checkout_commit_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(receipt) => {
                tracing::info!(%user_id, items = receipt.staged.len(), "cart committed");
            }
            Err(err) => {
                metrics::counter!("checkout_commit_failures_total", "stage" => err.stage().as_str())
                    .increment(1);
                log_failure("commit", user_id, err);
            }
        }
        result
    }

    /// Restores the staged items of the user into the primary store.
    ///
    /// Fails with `NoStagedData` if nothing is staged. If the insert fails
    /// the staging record stays intact and `RollbackInsertFailed` is
    /// returned; retrying is safe. Restored rows are never inserted twice.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn rollback(&self, ctx: &OpContext, user_id: UserId) -> Result<RollbackReceipt> {
        metrics::counter!("checkout_rollbacks_total").increment(1);
        let started = std::time::Instant::now();

        let result = self.run_rollback(ctx, user_id).await;

        metrics::histogram!("checkout_rollback_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(receipt) => {
                tracing::info!(
                    %user_id,
                    outcome = ?receipt.outcome,
                    items = receipt.items.len(),
                    "cart rolled back"
                );
            }
            Err(err) => {
                metrics::counter!("checkout_rollback_failures_total", "stage" => err.stage().as_str())
                    .increment(1);
                log_failure("rollback", user_id, err);
            }
        }
        result
    }

    /// Retries the primary-store delete of a commit that ended in
    /// `CommitPartialFailure`.
    ///
    /// The user's rows must still be exactly the staged snapshot, otherwise
    /// `CartChanged` is returned and nothing is deleted. If the earlier
    /// delete turns out to have landed, the receipt reports zero removed.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn resume_commit(&self, ctx: &OpContext, user_id: UserId) -> Result<CommitReceipt> {
        let _guard = self.acquire(ctx, user_id).await?;

        let snapshot = match self.unconfirmed_for(user_id) {
            Some(Unconfirmed::Delete { snapshot }) => snapshot,
            _ => return Err(CheckoutError::NoPendingCommit { user_id }),
        };

        let current = self.list_primary(ctx, user_id).await?;
        let removed = if current.is_empty() {
            // The interrupted delete had landed after all
            self.unconfirmed.remove(&user_id);
            0
        } else {
            let current_ids: HashSet<LineItemId> = current.iter().map(|item| item.id).collect();
            let snapshot_ids: HashSet<LineItemId> = snapshot.iter().map(|item| item.id).collect();
            if current.len() != snapshot.len() || current_ids != snapshot_ids {
                return Err(CheckoutError::CartChanged { user_id });
            }
            self.delete_primary(ctx, user_id, &snapshot).await?
        };
        tracing::info!(%user_id, removed, "unfinished commit completed");

        Ok(CommitReceipt {
            user_id,
            staged: snapshot_entries(&snapshot),
            removed,
        })
    }

    /// Reports where the user's cart currently sits.
    pub async fn state(&self, ctx: &OpContext, user_id: UserId) -> Result<CheckoutState> {
        if let Some(state) = self.unconfirmed.get(&user_id).map(|u| u.value().state()) {
            return Ok(state);
        }

        let staged = ctx
            .bound(self.staging.get(user_id))
            .await
            .map_err(|_| CheckoutError::timeout(Stage::StagingCheck, false))?
            .map_err(|source| CheckoutError::Staging {
                stage: Stage::StagingCheck,
                source,
            })?;

        Ok(if staged.is_some() {
            CheckoutState::Staged
        } else {
            CheckoutState::Active
        })
    }

    /// Adds a line to the user's cart.
    ///
    /// Refused with `CartLocked` unless the cart is `Active`, so a line can
    /// never slip in between a commit's snapshot and its delete.
    #[tracing::instrument(skip(self, ctx, product_id), fields(product_id = %product_id))]
    pub async fn add_item(
        &self,
        ctx: &OpContext,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLineItem> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity { user_id });
        }
        let _guard = self.acquire(ctx, user_id).await?;
        self.ensure_editable(ctx, user_id).await?;

        let item = CartLineItem::new(user_id, product_id, quantity);
        ctx.bound(self.store.bulk_insert(vec![item.clone()]))
            .await
            .map_err(|_| CheckoutError::timeout(Stage::PrimaryWrite, false))?
            .map_err(|source| CheckoutError::Store {
                stage: Stage::PrimaryWrite,
                source,
            })?;

        tracing::debug!(%user_id, item_id = %item.id, "line item added");
        Ok(item)
    }

    /// Changes the quantity of one line of an `Active` cart.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn update_item(
        &self,
        ctx: &OpContext,
        user_id: UserId,
        item_id: LineItemId,
        quantity: u32,
    ) -> Result<CartLineItem> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity { user_id });
        }
        let _guard = self.acquire(ctx, user_id).await?;
        self.ensure_editable(ctx, user_id).await?;

        ctx.bound(self.store.update_quantity(user_id, item_id, quantity))
            .await
            .map_err(|_| CheckoutError::timeout(Stage::PrimaryWrite, false))?
            .map_err(|source| CheckoutError::Store {
                stage: Stage::PrimaryWrite,
                source,
            })?
            .ok_or(CheckoutError::ItemNotFound { user_id, item_id })
    }

    /// Removes one line of an `Active` cart.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn remove_item(
        &self,
        ctx: &OpContext,
        user_id: UserId,
        item_id: LineItemId,
    ) -> Result<()> {
        let _guard = self.acquire(ctx, user_id).await?;
        self.ensure_editable(ctx, user_id).await?;

        let removed = ctx
            .bound(self.store.remove_item(user_id, item_id))
            .await
            .map_err(|_| CheckoutError::timeout(Stage::PrimaryWrite, false))?
            .map_err(|source| CheckoutError::Store {
                stage: Stage::PrimaryWrite,
                source,
            })?;
        if !removed {
            return Err(CheckoutError::ItemNotFound { user_id, item_id });
        }
        Ok(())
    }

    /// Fails unless the cart may be edited. Call with the user's lock held.
    async fn ensure_editable(&self, ctx: &OpContext, user_id: UserId) -> Result<()> {
        let state = self.state(ctx, user_id).await?;
        if state.can_commit() {
            return Ok(());
        }
        if state.is_partial() {
            tracing::warn!(%user_id, %state, "cart edit refused, checkout step unconfirmed");
        }
        Err(CheckoutError::CartLocked { user_id, state })
    }

    async fn run_commit(&self, ctx: &OpContext, user_id: UserId) -> Result<CommitReceipt> {
        let _guard = self.acquire(ctx, user_id).await?;

        // 1. Precondition: nothing staged yet
        let existing = ctx
            .bound(self.staging.get(user_id))
            .await
            .map_err(|_| CheckoutError::timeout(Stage::StagingCheck, false))?
            .map_err(|source| CheckoutError::Staging {
                stage: Stage::StagingCheck,
                source,
            })?;
        if existing.is_some() {
            return Err(CheckoutError::AlreadyStaged { user_id });
        }

        // 2. Snapshot the cart
        let items = self.list_primary(ctx, user_id).await?;
        if items.is_empty() {
            return Err(CheckoutError::NothingToCommit { user_id });
        }
        let entries = snapshot_entries(&items);

        // 3. Stage it
        tracing::debug!(%user_id, items = entries.len(), "writing staging record");
        match ctx.bound(self.staging.put(user_id, entries.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                self.discard_unconfirmed_stage(user_id).await;
                return Err(CheckoutError::Staging {
                    stage: Stage::StageWrite,
                    source,
                });
            }
            Err(_) => {
                self.discard_unconfirmed_stage(user_id).await;
                return Err(CheckoutError::timeout(Stage::StageWrite, false));
            }
        }

        // 4. Only now remove the items from the primary store
        let removed = self.delete_primary(ctx, user_id, &items).await?;

        Ok(CommitReceipt {
            user_id,
            staged: entries,
            removed,
        })
    }

    async fn run_rollback(&self, ctx: &OpContext, user_id: UserId) -> Result<RollbackReceipt> {
        let _guard = self.acquire(ctx, user_id).await?;

        let mut retry_items = None;
        match self.unconfirmed_for(user_id) {
            Some(Unconfirmed::Clear { items }) => {
                self.clear_restored(ctx, user_id, &items).await?;
                return Ok(RollbackReceipt {
                    user_id,
                    outcome: RollbackOutcome::ClearRetried,
                    items,
                });
            }
            Some(Unconfirmed::Delete { snapshot }) => {
                let current = self.list_primary(ctx, user_id).await?;

                // The delete is atomic: if any snapshot row survives, none were removed
                if current.iter().any(|item| snapshot.iter().any(|s| s.id == item.id)) {
                    self.discard_stage(ctx, user_id).await?;
                    self.unconfirmed.remove(&user_id);
                    return Ok(RollbackReceipt {
                        user_id,
                        outcome: RollbackOutcome::StageDiscarded,
                        items: current,
                    });
                }
                self.unconfirmed.remove(&user_id);
            }
            Some(Unconfirmed::Insert { items }) => retry_items = Some(items),
            None => {}
        }

        // 1. Read the stage
        let entries = ctx
            .bound(self.staging.get(user_id))
            .await
            .map_err(|_| CheckoutError::timeout(Stage::StagingRead, false))?
            .map_err(|source| CheckoutError::Staging {
                stage: Stage::StagingRead,
                source,
            })?;
        let Some(entries) = entries else {
            self.unconfirmed.remove(&user_id);
            return Err(CheckoutError::NoStagedData { user_id });
        };
        validate_entries(user_id, &entries)?;

        // 2. Rebuild rows, reusing the ids of an unconfirmed earlier insert
        let retrying = retry_items.is_some();
        let items = retry_items.unwrap_or_else(|| restore_items(user_id, &entries));

        // 3. Insert them
        match ctx.bound(self.store.bulk_insert(items.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(CartStoreError::DuplicateItem(id)))
                if retrying && items.iter().any(|item| item.id == id) =>
            {
                tracing::info!(%user_id, "restored rows already present, skipping insert");
            }
            Ok(Err(source)) => {
                self.unconfirmed
                    .insert(user_id, Unconfirmed::Insert { items });
                return Err(CheckoutError::RollbackInsertFailed { user_id, source });
            }
            Err(_) => {
                self.unconfirmed
                    .insert(user_id, Unconfirmed::Insert { items });
                return Err(CheckoutError::timeout(Stage::PrimaryInsert, true));
            }
        }

        // 4. Clear the stage
        self.clear_restored(ctx, user_id, &items).await?;

        Ok(RollbackReceipt {
            user_id,
            outcome: RollbackOutcome::Restored,
            items,
        })
    }

    async fn acquire(&self, ctx: &OpContext, user_id: UserId) -> Result<UserLockGuard> {
        if ctx.is_expired() {
            return Err(CheckoutError::timeout(Stage::Lock, false));
        }
        ctx.bound(self.locks.lock(user_id))
            .await
            .map_err(|_| CheckoutError::timeout(Stage::Lock, false))
    }

    async fn list_primary(&self, ctx: &OpContext, user_id: UserId) -> Result<Vec<CartLineItem>> {
        ctx.bound(self.store.list_items(user_id))
            .await
            .map_err(|_| CheckoutError::timeout(Stage::PrimaryList, false))?
            .map_err(|source| CheckoutError::Store {
                stage: Stage::PrimaryList,
                source,
            })
    }

    fn unconfirmed_for(&self, user_id: UserId) -> Option<Unconfirmed> {
        self.unconfirmed.get(&user_id).map(|u| u.value().clone())
    }

    /// Deletes the user's rows, recording the snapshot if the outcome is unknown.
    ///
    /// The delete must remove exactly the snapshot; any other count means
    /// the primary store changed underneath the lock.
    async fn delete_primary(
        &self,
        ctx: &OpContext,
        user_id: UserId,
        snapshot: &[CartLineItem],
    ) -> Result<u64> {
        match ctx.bound(self.store.delete_all_for_user(user_id)).await {
            Ok(Ok(removed)) => {
                self.unconfirmed.remove(&user_id);
                let staged = snapshot.len();
                if removed != staged as u64 {
                    // Rows written outside the coordinator went with the delete
                    return Err(CheckoutError::DeleteCountMismatch {
                        user_id,
                        staged,
                        removed,
                    });
                }
                Ok(removed)
            }
            Ok(Err(source)) => {
                self.unconfirmed.insert(
                    user_id,
                    Unconfirmed::Delete {
                        snapshot: snapshot.to_vec(),
                    },
                );
                Err(CheckoutError::CommitPartialFailure { user_id, source })
            }
            Err(_) => {
                self.unconfirmed.insert(
                    user_id,
                    Unconfirmed::Delete {
                        snapshot: snapshot.to_vec(),
                    },
                );
                Err(CheckoutError::timeout(Stage::PrimaryDelete, true))
            }
        }
    }

    /// Clears the stage after a confirmed insert.
    async fn clear_restored(
        &self,
        ctx: &OpContext,
        user_id: UserId,
        items: &[CartLineItem],
    ) -> Result<()> {
        match self.delete_staging_with_retry(ctx, user_id).await {
            Ok(()) => {
                self.unconfirmed.remove(&user_id);
                Ok(())
            }
            Err(failure) => {
                self.unconfirmed.insert(
                    user_id,
                    Unconfirmed::Clear {
                        items: items.to_vec(),
                    },
                );
                Err(match failure {
                    ClearFailure::TimedOut => CheckoutError::timeout(Stage::StagingClear, true),
                    ClearFailure::Failed(source) => {
                        CheckoutError::StagingClearFailed { user_id, source }
                    }
                })
            }
        }
    }

    /// Drops a stage whose items never left the primary store.
    async fn discard_stage(&self, ctx: &OpContext, user_id: UserId) -> Result<()> {
        self.delete_staging_with_retry(ctx, user_id)
            .await
            .map_err(|failure| match failure {
                ClearFailure::TimedOut => CheckoutError::timeout(Stage::StagingClear, false),
                ClearFailure::Failed(source) => CheckoutError::Staging {
                    stage: Stage::StagingClear,
                    source,
                },
            })
    }

    async fn delete_staging_with_retry(
        &self,
        ctx: &OpContext,
        user_id: UserId,
    ) -> std::result::Result<(), ClearFailure> {
        let attempts = self.config.clear_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match ctx.bound(self.staging.delete(user_id)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => err,
                Err(_) => return Err(ClearFailure::TimedOut),
            };

            if attempt >= attempts {
                return Err(ClearFailure::Failed(err));
            }
            tracing::warn!(%user_id, attempt, error = %err, "staging clear failed, retrying");
            attempt += 1;

            if ctx
                .bound(tokio::time::sleep(self.config.clear_backoff))
                .await
                .is_err()
            {
                return Err(ClearFailure::TimedOut);
            }
        }
    }

    /// Best-effort removal of a staging write whose outcome is unknown.
    ///
    /// Runs on its own timeout since the caller's deadline may have passed.
    async fn discard_unconfirmed_stage(&self, user_id: UserId) {
        let cleanup =
            tokio::time::timeout(self.config.op_timeout, self.staging.delete(user_id)).await;
        match cleanup {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(%user_id, error = %err, "failed to discard unconfirmed staging write");
            }
            Err(_) => {
                tracing::error!(%user_id, "timed out discarding unconfirmed staging write");
            }
        }
    }
}

fn snapshot_entries(items: &[CartLineItem]) -> Vec<StagedEntry> {
    items
        .iter()
        .map(|item| StagedEntry::new(item.product_id.clone(), item.quantity))
        .collect()
}

fn restore_items(user_id: UserId, entries: &[StagedEntry]) -> Vec<CartLineItem> {
    let now = Utc::now();
    entries
        .iter()
        .map(|entry| CartLineItem::new_at(user_id, entry.product_id.clone(), entry.quantity, now))
        .collect()
}

fn validate_entries(user_id: UserId, entries: &[StagedEntry]) -> Result<()> {
    if entries.is_empty() {
        return Err(CheckoutError::CorruptStagingRecord {
            user_id,
            reason: "record has no entries".to_string(),
        });
    }
    if let Some(entry) = entries.iter().find(|e| e.quantity == 0) {
        return Err(CheckoutError::CorruptStagingRecord {
            user_id,
            reason: format!("zero quantity for product {}", entry.product_id),
        });
    }
    Ok(())
}

fn log_failure(op: &str, user_id: UserId, err: &CheckoutError) {
    let stage = err.stage().as_str();
    match err.kind() {
        ErrorKind::Precondition => {
            tracing::info!(%user_id, op, stage, error = %err, "checkout precondition failed");
        }
        ErrorKind::Transient => {
            tracing::warn!(%user_id, op, stage, error = %err, "checkout step unavailable");
        }
        ErrorKind::PartialFailure => {
            tracing::error!(%user_id, op, stage, error = %err, "checkout stopped between stores");
        }
        ErrorKind::Internal => {
            tracing::error!(%user_id, op, stage, error = %err, "checkout failed");
        }
    }
}

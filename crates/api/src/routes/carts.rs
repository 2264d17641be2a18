//! Cart listing and checkout staging endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use cart_store::{CartLineItem, CartStore};
use chrono::{DateTime, Utc};
use checkout::{CheckoutCoordinator, CheckoutState, CommitReceipt, RollbackOutcome, RollbackReceipt};
use common::{LineItemId, UserId};
use serde::{Deserialize, Serialize};
use staging::{StagedEntry, StagingCache};

use crate::error::ApiError;

/// Header carrying the user id of an already authenticated caller.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state accessible from all handlers.
pub struct AppState<C: CartStore, S: StagingCache> {
    pub coordinator: CheckoutCoordinator<C, S>,
}

/// The user on whose cart the request acts.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl<T: Send + Sync> FromRequestParts<T> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &T) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
            metrics::counter!("api_unauthorized_requests_total", "reason" => "missing").increment(1);
            return Err(ApiError::Unauthorized(format!("Missing {USER_ID_HEADER} header")));
        };
        match raw.to_str().ok().and_then(|s| s.trim().parse::<UserId>().ok()) {
            Some(user_id) => Ok(AuthUser(user_id)),
            None => {
                metrics::counter!("api_unauthorized_requests_total", "reason" => "malformed")
                    .increment(1);
                Err(ApiError::Unauthorized(format!("Invalid {USER_ID_HEADER} header")))
            }
        }
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct LineItemResponse {
    pub id: String,
    pub product_id: String,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<CartLineItem> for LineItemResponse {
    fn from(item: CartLineItem) -> Self {
        Self {
            id: item.id.to_string(),
            product_id: item.product_id.to_string(),
            quantity: item.quantity,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct CartResponse {
    pub user_id: String,
    pub state: CheckoutState,
    pub can_commit: bool,
    pub can_rollback: bool,
    /// A checkout step is unconfirmed; resume or roll back before editing.
    pub partial: bool,
    pub items: Vec<LineItemResponse>,
}

#[derive(Serialize)]
pub struct CommitResponse {
    pub user_id: String,
    pub staged: Vec<StagedEntry>,
    pub removed: u64,
}

impl From<CommitReceipt> for CommitResponse {
    fn from(receipt: CommitReceipt) -> Self {
        Self {
            user_id: receipt.user_id.to_string(),
            staged: receipt.staged,
            removed: receipt.removed,
        }
    }
}

#[derive(Serialize)]
pub struct RollbackResponse {
    pub user_id: String,
    pub outcome: &'static str,
    pub items: Vec<LineItemResponse>,
}

impl From<RollbackReceipt> for RollbackResponse {
    fn from(receipt: RollbackReceipt) -> Self {
        let outcome = match receipt.outcome {
            RollbackOutcome::Restored => "restored",
            RollbackOutcome::ClearRetried => "clear_retried",
            RollbackOutcome::StageDiscarded => "stage_discarded",
        };
        Self {
            user_id: receipt.user_id.to_string(),
            outcome,
            items: receipt.items.into_iter().map(Into::into).collect(),
        }
    }
}

// -- Handlers --

/// GET /carts: the caller's line items and checkout state.
#[tracing::instrument(skip(state))]
pub async fn list<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<CartResponse>, ApiError>
where
    C: CartStore + 'static,
    S: StagingCache + 'static,
{
    let coordinator = &state.coordinator;
    let ctx = coordinator.default_context();
    let checkout_state = coordinator.state(&ctx, user_id).await?;
    let items = coordinator.store().list_items(user_id).await?;

    Ok(Json(CartResponse {
        user_id: user_id.to_string(),
        state: checkout_state,
        can_commit: checkout_state.can_commit(),
        can_rollback: checkout_state.can_rollback(),
        partial: checkout_state.is_partial(),
        items: items.into_iter().map(Into::into).collect(),
    }))
}

/// POST /carts: add one line to the caller's cart.
#[tracing::instrument(skip(state, req))]
pub async fn add<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<LineItemResponse>), ApiError>
where
    C: CartStore + 'static,
    S: StagingCache + 'static,
{
    if req.product_id.trim().is_empty() {
        return Err(ApiError::BadRequest("product_id is required".to_string()));
    }

    let ctx = state.coordinator.default_context();
    let item = state
        .coordinator
        .add_item(&ctx, user_id, req.product_id.into(), req.quantity)
        .await?;

    Ok((StatusCode::CREATED, Json(item.into())))
}

/// PUT /carts/{id}: change the quantity of one line.
#[tracing::instrument(skip(state, req))]
pub async fn update<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<LineItemResponse>, ApiError>
where
    C: CartStore + 'static,
    S: StagingCache + 'static,
{
    let item_id = parse_item_id(&id)?;
    let ctx = state.coordinator.default_context();
    let item = state
        .coordinator
        .update_item(&ctx, user_id, item_id, req.quantity)
        .await?;
    Ok(Json(item.into()))
}

/// DELETE /carts/{id}: remove one line.
#[tracing::instrument(skip(state))]
pub async fn remove<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    C: CartStore + 'static,
    S: StagingCache + 'static,
{
    let item_id = parse_item_id(&id)?;
    let ctx = state.coordinator.default_context();
    state.coordinator.remove_item(&ctx, user_id, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_item_id(raw: &str) -> Result<LineItemId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid line item id: {raw}")))
}

/// POST /carts/tx: stage the caller's cart and clear it.
#[tracing::instrument(skip(state))]
pub async fn commit<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<CommitResponse>, ApiError>
where
    C: CartStore + 'static,
    S: StagingCache + 'static,
{
    let ctx = state.coordinator.default_context();
    let receipt = state.coordinator.commit(&ctx, user_id).await?;
    Ok(Json(receipt.into()))
}

/// POST /carts/tx-resume: finish a commit whose delete failed.
#[tracing::instrument(skip(state))]
pub async fn resume<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<CommitResponse>, ApiError>
where
    C: CartStore + 'static,
    S: StagingCache + 'static,
{
    let ctx = state.coordinator.default_context();
    let receipt = state.coordinator.resume_commit(&ctx, user_id).await?;
    Ok(Json(receipt.into()))
}

/// POST /carts/tx-rollback: restore the caller's staged cart.
#[tracing::instrument(skip(state))]
pub async fn rollback<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<RollbackResponse>, ApiError>
where
    C: CartStore + 'static,
    S: StagingCache + 'static,
{
    let ctx = state.coordinator.default_context();
    let receipt = state.coordinator.rollback(&ctx, user_id).await?;
    Ok(Json(receipt.into()))
}

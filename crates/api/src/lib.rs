//! HTTP API server with observability for cart checkout staging.
//!
//! Exposes the caller's cart plus the commit and rollback operations of the
//! checkout coordinator, with structured logging (tracing) and Prometheus
//! metrics. Authentication happens upstream; the user id arrives in the
//! `x-user-id` header.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use cart_store::{CartStore, InMemoryCartStore};
use checkout::{CheckoutConfig, CheckoutCoordinator};
use metrics_exporter_prometheus::PrometheusHandle;
use staging::{InMemoryStagingCache, StagingCache};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::carts::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<C, S>(state: Arc<AppState<C, S>>, metrics_handle: PrometheusHandle) -> Router
where
    C: CartStore + 'static,
    S: StagingCache + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/carts", get(routes::carts::list::<C, S>))
        .route("/carts", post(routes::carts::add::<C, S>))
        .route(
            "/carts/{id}",
            put(routes::carts::update::<C, S>).delete(routes::carts::remove::<C, S>),
        )
        .route("/carts/tx", post(routes::carts::commit::<C, S>))
        .route("/carts/tx-resume", post(routes::carts::resume::<C, S>))
        .route("/carts/tx-rollback", post(routes::carts::rollback::<C, S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over the given stores.
pub fn create_state<C, S>(store: C, staging: S, config: CheckoutConfig) -> Arc<AppState<C, S>>
where
    C: CartStore,
    S: StagingCache,
{
    Arc::new(AppState {
        coordinator: CheckoutCoordinator::new(store, staging, config),
    })
}

/// Creates application state backed by the in-memory stores.
pub fn create_default_state(
    config: CheckoutConfig,
) -> Arc<AppState<InMemoryCartStore, InMemoryStagingCache>> {
    create_state(InMemoryCartStore::new(), InMemoryStagingCache::new(), config)
}

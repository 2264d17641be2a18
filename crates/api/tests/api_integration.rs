//! Integration tests for the API server.

use std::sync::Arc;
use std::sync::OnceLock;

use api::routes::carts::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cart_store::{CartLineItem, CartStore, InMemoryCartStore};
use checkout::CheckoutConfig;
use common::UserId;
use metrics_exporter_prometheus::PrometheusHandle;
use staging::InMemoryStagingCache;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

type TestState = Arc<AppState<InMemoryCartStore, InMemoryStagingCache>>;

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_state() -> (axum::Router, TestState) {
    let state = api::create_default_state(CheckoutConfig::default());
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn seed(state: &TestState, user_id: UserId, pairs: &[(&str, u32)]) {
    let items = pairs
        .iter()
        .map(|(product, qty)| CartLineItem::new(user_id, *product, *qty))
        .collect();
    state.coordinator.store().bulk_insert(items).await.unwrap();
}

fn request(method: &str, uri: &str, user_id: Option<UserId>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn json_request(
    method: &str,
    uri: &str,
    user_id: UserId,
    body: serde_json::Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user_id.to_string())
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup_with_state();

    let response = app
        .oneshot(request("GET", "/health", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "cart-checkout");
}

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let (app, _) = setup_with_state();

    let response = app
        .oneshot(request("POST", "/carts/tx", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_user_header_is_unauthorized() {
    let (app, _) = setup_with_state();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/carts")
                .header("x-user-id", "not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_add_and_list_items() {
    let (app, _) = setup_with_state();
    let user_id = UserId::new();

    let add_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/carts")
                .header("x-user-id", user_id.to_string())
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_string(&serde_json::json!({
                        "product_id": "SKU-001",
                        "quantity": 2
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(add_response.status(), StatusCode::CREATED);

    let list_response = app
        .oneshot(request("GET", "/carts", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);

    let json = body_json(list_response).await;
    assert_eq!(json["user_id"], user_id.to_string());
    assert_eq!(json["state"], "Active");
    assert_eq!(json["can_commit"], true);
    assert_eq!(json["can_rollback"], false);
    assert_eq!(json["partial"], false);
    let items = json["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["product_id"], "SKU-001");
    assert_eq!(items[0]["quantity"], 2);
}

#[tokio::test]
async fn test_add_item_with_zero_quantity_is_rejected() {
    let (app, _) = setup_with_state();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/carts")
                .header("x-user-id", UserId::new().to_string())
                .header("content-type", "application/json")
                .body(Body::from(r#"{"product_id":"SKU-001","quantity":0}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_and_remove_item() {
    let (app, state) = setup_with_state();
    let user_id = UserId::new();

    let added = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/carts",
            user_id,
            serde_json::json!({ "product_id": "SKU-001", "quantity": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(added.status(), StatusCode::CREATED);
    let id = body_json(added).await["id"].as_str().unwrap().to_string();

    let updated = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/carts/{id}"),
            user_id,
            serde_json::json!({ "quantity": 4 }),
        ))
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    let json = body_json(updated).await;
    assert_eq!(json["quantity"], 4);
    assert!(!json["updated_at"].is_null());

    let removed = app
        .oneshot(request("DELETE", &format!("/carts/{id}"), Some(user_id)))
        .await
        .unwrap();
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    assert!(
        state
            .coordinator
            .store()
            .list_items(user_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_unknown_or_malformed_item_id() {
    let (app, _) = setup_with_state();
    let user_id = UserId::new();

    let missing = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/carts/{}", common::LineItemId::new()),
            user_id,
            serde_json::json!({ "quantity": 2 }),
        ))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let malformed = app
        .oneshot(request("DELETE", "/carts/not-an-id", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cart_edits_conflict_while_staged() {
    let (app, state) = setup_with_state();
    let user_id = UserId::new();
    seed(&state, user_id, &[("P1", 2)]).await;
    let item_id = state.coordinator.store().list_items(user_id).await.unwrap()[0].id;

    let commit = app
        .clone()
        .oneshot(request("POST", "/carts/tx", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(commit.status(), StatusCode::OK);

    let add = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/carts",
            user_id,
            serde_json::json!({ "product_id": "P9", "quantity": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(add.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(add).await["stage"], "staging-check");

    let update = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/carts/{item_id}"),
            user_id,
            serde_json::json!({ "quantity": 3 }),
        ))
        .await
        .unwrap();
    assert_eq!(update.status(), StatusCode::CONFLICT);

    let listed = app
        .clone()
        .oneshot(request("GET", "/carts", Some(user_id)))
        .await
        .unwrap();
    let json = body_json(listed).await;
    assert_eq!(json["state"], "Staged");
    assert_eq!(json["can_commit"], false);
    assert_eq!(json["can_rollback"], true);

    let rollback = app
        .oneshot(request("POST", "/carts/tx-rollback", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(rollback.status(), StatusCode::OK);
    let items = body_json(rollback).await["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["product_id"], "P1");
    assert_eq!(items[0]["quantity"], 2);
}

#[tokio::test]
async fn test_commit_then_rollback() {
    let (app, state) = setup_with_state();
    let user_id = UserId::new();
    seed(&state, user_id, &[("P1", 2), ("P2", 5), ("P1", 3)]).await;

    let commit_response = app
        .clone()
        .oneshot(request("POST", "/carts/tx", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(commit_response.status(), StatusCode::OK);

    let committed = body_json(commit_response).await;
    assert_eq!(committed["removed"], 3);
    assert_eq!(
        committed["staged"],
        serde_json::json!([
            {"product_id": "P1", "quantity": 2},
            {"product_id": "P2", "quantity": 5},
            {"product_id": "P1", "quantity": 3}
        ])
    );

    let list = body_json(
        app.clone()
            .oneshot(request("GET", "/carts", Some(user_id)))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(list["state"], "Staged");
    assert!(list["items"].as_array().unwrap().is_empty());

    let rollback_response = app
        .oneshot(request("POST", "/carts/tx-rollback", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(rollback_response.status(), StatusCode::OK);

    let rolled_back = body_json(rollback_response).await;
    assert_eq!(rolled_back["outcome"], "restored");
    assert_eq!(rolled_back["items"].as_array().unwrap().len(), 3);
    assert_eq!(
        state
            .coordinator
            .store()
            .list_items(user_id)
            .await
            .unwrap()
            .len(),
        3
    );
}

#[tokio::test]
async fn test_commit_empty_cart_is_unprocessable() {
    let (app, _) = setup_with_state();

    let response = app
        .oneshot(request("POST", "/carts/tx", Some(UserId::new())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["partial"], false);
}

#[tokio::test]
async fn test_second_commit_conflicts() {
    let (app, state) = setup_with_state();
    let user_id = UserId::new();
    seed(&state, user_id, &[("P1", 1)]).await;

    let first = app
        .clone()
        .oneshot(request("POST", "/carts/tx", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(request("POST", "/carts/tx", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_rollback_without_stage_conflicts() {
    let (app, _) = setup_with_state();

    let response = app
        .oneshot(request("POST", "/carts/tx-rollback", Some(UserId::new())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_partial_commit_is_reported_and_resumable() {
    let (app, state) = setup_with_state();
    let user_id = UserId::new();
    seed(&state, user_id, &[("P1", 2), ("P2", 5)]).await;
    state.coordinator.store().set_fail_on_delete(true);

    let response = app
        .clone()
        .oneshot(request("POST", "/carts/tx", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["partial"], true);
    assert_eq!(json["stage"], "primary-delete");
    assert_eq!(json["retryable"], true);

    state.coordinator.store().set_fail_on_delete(false);
    let resumed = app
        .oneshot(request("POST", "/carts/tx-resume", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(resumed.status(), StatusCode::OK);
    assert_eq!(body_json(resumed).await["removed"], 2);
    assert!(
        state
            .coordinator
            .store()
            .list_items(user_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_staging_outage_is_service_unavailable() {
    let (app, state) = setup_with_state();
    let user_id = UserId::new();
    seed(&state, user_id, &[("P1", 1)]).await;
    state.coordinator.staging().set_fail_on_get(true);

    let response = app
        .oneshot(request("POST", "/carts/tx", Some(user_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_reports_checkout_counters() {
    let (app, state) = setup_with_state();
    let user_id = UserId::new();
    seed(&state, user_id, &[("P1", 1)]).await;

    let commit = app
        .clone()
        .oneshot(request("POST", "/carts/tx", Some(user_id)))
        .await
        .unwrap();
    assert_eq!(commit.status(), StatusCode::OK);

    let response = app
        .oneshot(request("GET", "/metrics", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("checkout_commits_total"));
}

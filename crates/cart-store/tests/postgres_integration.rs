//! PostgreSQL integration tests for the cart store.
//!
//! These tests share one PostgreSQL container and truncate the tables
//! between tests, so they are serialized with `serial_test`.

use std::sync::Arc;

use cart_store::{CartLineItem, CartStore, CartStoreError, PostgresCartStore, UserId};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Run migrations through the store itself
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresCartStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresCartStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE carts, cart_staging")
        .execute(&pool)
        .await
        .unwrap();

    PostgresCartStore::new(pool)
}

fn items_for(user_id: UserId, pairs: &[(&str, u32)]) -> Vec<CartLineItem> {
    let now = chrono::Utc::now();
    pairs
        .iter()
        .map(|(product, qty)| CartLineItem::new_at(user_id, *product, *qty, now))
        .collect()
}

#[tokio::test]
#[serial]
async fn bulk_insert_and_list_round_trip() {
    let store = get_test_store().await;
    let user_id = UserId::new();
    let items = items_for(user_id, &[("P1", 2), ("P2", 5), ("P1", 3)]);

    store.bulk_insert(items.clone()).await.unwrap();

    let listed = store.list_items(user_id).await.unwrap();
    assert_eq!(listed.len(), 3);
    // Same created_at: insertion order decides
    let pairs: Vec<_> = listed
        .iter()
        .map(|i| (i.product_id.as_str().to_string(), i.quantity))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("P1".to_string(), 2),
            ("P2".to_string(), 5),
            ("P1".to_string(), 3)
        ]
    );
    assert_eq!(listed[0].id, items[0].id);
}

#[tokio::test]
#[serial]
async fn list_unknown_user_is_empty() {
    let store = get_test_store().await;
    assert!(store.list_items(UserId::new()).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn delete_all_for_user_is_scoped() {
    let store = get_test_store().await;
    let alice = UserId::new();
    let bob = UserId::new();
    store
        .bulk_insert(items_for(alice, &[("P1", 1), ("P2", 1)]))
        .await
        .unwrap();
    store
        .bulk_insert(items_for(bob, &[("P3", 4)]))
        .await
        .unwrap();

    let removed = store.delete_all_for_user(alice).await.unwrap();

    assert_eq!(removed, 2);
    assert!(store.list_items(alice).await.unwrap().is_empty());
    assert_eq!(store.list_items(bob).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn bulk_insert_rolls_back_whole_batch_on_conflict() {
    let store = get_test_store().await;
    let user_id = UserId::new();
    let existing = CartLineItem::new(user_id, "P1", 1);
    store.bulk_insert(vec![existing.clone()]).await.unwrap();

    let batch = vec![CartLineItem::new(user_id, "P2", 1), existing.clone()];
    let result = store.bulk_insert(batch).await;

    assert!(matches!(result, Err(CartStoreError::DuplicateItem(id)) if id == existing.id));
    assert_eq!(store.list_items(user_id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn bulk_insert_rejects_empty_batch() {
    let store = get_test_store().await;
    let result = store.bulk_insert(vec![]).await;
    assert!(matches!(result, Err(CartStoreError::InvalidBatch(_))));
}

#[tokio::test]
#[serial]
async fn update_quantity_sets_updated_at() {
    let store = get_test_store().await;
    let user_id = UserId::new();
    let items = items_for(user_id, &[("P1", 1), ("P2", 2)]);
    store.bulk_insert(items.clone()).await.unwrap();

    let updated = store
        .update_quantity(user_id, items[0].id, 7)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.id, items[0].id);
    assert_eq!(updated.quantity, 7);
    assert!(updated.updated_at.is_some());
    assert!(
        store
            .update_quantity(UserId::new(), items[0].id, 3)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn remove_item_deletes_one_line() {
    let store = get_test_store().await;
    let user_id = UserId::new();
    let items = items_for(user_id, &[("P1", 1), ("P1", 2)]);
    store.bulk_insert(items.clone()).await.unwrap();

    assert!(store.remove_item(user_id, items[0].id).await.unwrap());
    assert!(!store.remove_item(user_id, items[0].id).await.unwrap());

    let remaining = store.list_items(user_id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, items[1].id);
}

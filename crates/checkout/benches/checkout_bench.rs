use cart_store::{CartLineItem, CartStore, InMemoryCartStore};
use checkout::{CheckoutConfig, CheckoutCoordinator, OpContext};
use common::UserId;
use criterion::{Criterion, criterion_group, criterion_main};
use staging::InMemoryStagingCache;

fn make_items(user_id: UserId, count: usize) -> Vec<CartLineItem> {
    (0..count)
        .map(|n| CartLineItem::new(user_id, format!("SKU-{:03}", n % 7), (n % 5 + 1) as u32))
        .collect()
}

fn bench_commit_rollback(c: &mut Criterion, count: usize) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function(&format!("checkout/commit_rollback_{count}_items"), |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryCartStore::new();
                let staging = InMemoryStagingCache::new();
                let coordinator =
                    CheckoutCoordinator::new(store.clone(), staging, CheckoutConfig::default());
                let user_id = UserId::new();
                store.bulk_insert(make_items(user_id, count)).await.unwrap();

                let ctx = OpContext::background();
                coordinator.commit(&ctx, user_id).await.unwrap();
                coordinator.rollback(&ctx, user_id).await.unwrap();
            });
        });
    });
}

fn bench_small_cart(c: &mut Criterion) {
    bench_commit_rollback(c, 3);
}

fn bench_large_cart(c: &mut Criterion) {
    bench_commit_rollback(c, 100);
}

criterion_group!(benches, bench_small_cart, bench_large_cart);
criterion_main!(benches);

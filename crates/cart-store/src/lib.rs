pub mod error;
pub mod item;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{LineItemId, ProductId, UserId};
pub use error::{CartStoreError, Result};
pub use item::CartLineItem;
pub use memory::InMemoryCartStore;
pub use postgres::PostgresCartStore;
pub use store::{CartStore, validate_items_for_insert};

//! Shared identifier types for the cart checkout workspace.

mod types;

pub use types::{LineItemId, ProductId, UserId};

//! Staging cache for checked-out carts.
//!
//! A staging record holds the ordered snapshot of a user's cart between a
//! checkout commit and its rollback. Entries are kept as a sequence, not a
//! map keyed by product, so two lines for the same product both survive.

pub mod cache;
pub mod entry;
pub mod error;
pub mod memory;
pub mod postgres;

pub use cache::StagingCache;
pub use common::{ProductId, UserId};
pub use entry::StagedEntry;
pub use error::{Result, StagingError};
pub use memory::InMemoryStagingCache;
pub use postgres::PostgresStagingCache;

//! Versioned order status history storage.
//!
//! The `OrderStatusRepository` trait is the storage boundary: anything that can insert,
//! range-delete and range-select rows keyed by `(order_id, version)` can back it.

pub mod in_memory;
pub mod postgres;
pub mod sqlite;
pub mod r#trait;

mod sql;

#[cfg(test)]
pub(crate) mod contract;

pub use in_memory::InMemoryOrderStatusRepository;
pub use postgres::PostgresOrderStatusRepository;
pub use sqlite::SqliteOrderStatusRepository;
pub use r#trait::{OrderStatusRepository, RepositoryError};

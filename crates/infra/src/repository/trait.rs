use std::sync::Arc;

use thiserror::Error;

use orderflow_core::OrderId;
use orderflow_orders::{OrderStatus, StatusUpdate, StatusUpdateRecord};

/// Repository operation error.
///
/// These are **infrastructure errors** (storage, uniqueness, decoding) as opposed to
/// domain errors (parsing, validation).
///
/// Unknown orders are never an error: reads return an empty history, and updates or
/// deletes that match nothing are no-ops.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// `(order_id, version)` already exists. Not retried.
    #[error("duplicate version {version} for order {order_id}")]
    DuplicateVersion { order_id: OrderId, version: u64 },

    /// Connection, transaction or runtime failure. Safe to retry with backoff.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The version can't be represented by the backing store.
    #[error("version {0} is out of range for the backing store")]
    InvalidVersion(u64),

    /// A stored row could not be decoded.
    #[error("corrupt status row: {0}")]
    Corrupt(String),
}

/// Versioned status history store, keyed by `(order_id, version)`.
///
/// ## Versions
///
/// The repository never allocates versions. Callers supply them and keep them
/// increasing per order; `latest_version()` is there to help them pick the next one.
///
/// ## `update_status` semantics
///
/// `update_status` selects rows by `order_id` alone (no version predicate) and writes
/// `new_status` and `version` into every one of them:
///
/// - no rows: no-op, returns `0`
/// - one row: the row is overwritten (and re-keyed under the new version)
/// - two or more rows: they would all end up with the same key, which the primary key
///   forbids, so the call fails with `DuplicateVersion` and nothing changes
///
/// Concurrent `update_status` calls for the same order can lose updates.
///
/// `overwrite_or_insert` is the same overwrite, except that an order with no rows gets
/// `update` inserted. The check and the write happen as one atomic step, so concurrent
/// first transitions of one order leave a single row (the last writer's).
///
/// ## Implementation requirements
///
/// - `ensure_schema()` is create-if-absent and may be called any number of times
/// - history is returned ascending by version
/// - multi-row writes are atomic
pub trait OrderStatusRepository: Send + Sync {
    /// Create the backing table if it does not exist yet.
    fn ensure_schema(&self) -> Result<(), RepositoryError>;

    /// Insert a new history row.
    fn add_order_status_update(&self, update: &StatusUpdate) -> Result<(), RepositoryError>;

    /// Overwrite the row(s) of `order_id`. Returns the number of rows changed.
    fn update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        version: u64,
    ) -> Result<u64, RepositoryError>;

    /// Overwrite the order's single row with `update`, or insert `update` when the order
    /// has no rows yet. Returns the number of rows overwritten (`0` means inserted).
    fn overwrite_or_insert(&self, update: &StatusUpdate) -> Result<u64, RepositoryError>;

    /// Full history of an order, ascending by version.
    fn get_order_status_updates(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusUpdateRecord>, RepositoryError>;

    /// Delete every row of `order_id` with `version > target_version`.
    /// Returns the number of rows removed.
    fn revert_to_version(&self, order_id: OrderId, target_version: u64)
    -> Result<u64, RepositoryError>;

    /// Highest stored version of an order, if any.
    fn latest_version(&self, order_id: OrderId) -> Result<Option<u64>, RepositoryError> {
        Ok(self
            .get_order_status_updates(order_id)?
            .last()
            .map(|r| r.version))
    }
}

impl<R> OrderStatusRepository for Arc<R>
where
    R: OrderStatusRepository + ?Sized,
{
    fn ensure_schema(&self) -> Result<(), RepositoryError> {
        (**self).ensure_schema()
    }

    fn add_order_status_update(&self, update: &StatusUpdate) -> Result<(), RepositoryError> {
        (**self).add_order_status_update(update)
    }

    fn update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        version: u64,
    ) -> Result<u64, RepositoryError> {
        (**self).update_status(order_id, new_status, version)
    }

    fn overwrite_or_insert(&self, update: &StatusUpdate) -> Result<u64, RepositoryError> {
        (**self).overwrite_or_insert(update)
    }

    fn get_order_status_updates(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusUpdateRecord>, RepositoryError> {
        (**self).get_order_status_updates(order_id)
    }

    fn revert_to_version(
        &self,
        order_id: OrderId,
        target_version: u64,
    ) -> Result<u64, RepositoryError> {
        (**self).revert_to_version(order_id, target_version)
    }

    fn latest_version(&self, order_id: OrderId) -> Result<Option<u64>, RepositoryError> {
        (**self).latest_version(order_id)
    }
}

//! Helpers shared by the sqlx-backed repositories.
//!
//! ## Error Mapping
//!
//! | SQLx Error | RepositoryError |
//! |------------|--------------------|
//! | Database, unique violation | `DuplicateVersion` (mapped at the call site, which knows the key) |
//! | Database, other | `StorageUnavailable` |
//! | PoolClosed / PoolTimedOut / Io / Tls | `StorageUnavailable` |
//! | ColumnDecode / ColumnNotFound / Decode | `Corrupt` |
//! | Other | `StorageUnavailable` |

use std::future::Future;

use tokio::runtime::Runtime;

use orderflow_orders::OrderStatus;

use super::r#trait::RepositoryError;

/// Tokio runtime owned by a repository opened through the sync constructors.
///
/// Shut down in the background on drop, so the last clone of a repository may be
/// released from async code.
#[derive(Debug)]
pub(crate) struct OwnedRuntime(Option<Runtime>);

impl OwnedRuntime {
    /// Build the runtime a sync repository drives its pool on.
    pub(crate) fn build(name: &str) -> Result<Self, RepositoryError> {
        refuse_inside_runtime()?;
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(name)
            .enable_all()
            .build()
            .map(|rt| Self(Some(rt)))
            .map_err(|e| {
                RepositoryError::StorageUnavailable(format!("failed to start {name} runtime: {e}"))
            })
    }
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

fn refuse_inside_runtime() -> Result<(), RepositoryError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(RepositoryError::StorageUnavailable(
            "sync repository API called from inside an async runtime; use the *_async methods"
                .to_string(),
        ));
    }
    Ok(())
}

/// Run `fut` to completion on the repository's own runtime.
///
/// Must be called from outside any async context: `block_on` panics when nested in a
/// runtime, so this refuses up front instead. Repositories opened with `connect_async`
/// have no runtime of their own and only serve the `*_async` methods.
pub(crate) fn block_on<F, T>(runtime: Option<&OwnedRuntime>, fut: F) -> Result<T, RepositoryError>
where
    F: Future<Output = Result<T, RepositoryError>>,
{
    refuse_inside_runtime()?;
    match runtime.and_then(|rt| rt.0.as_ref()) {
        Some(rt) => rt.block_on(fut),
        None => Err(RepositoryError::StorageUnavailable(
            "repository was opened with connect_async; use the *_async methods".to_string(),
        )),
    }
}

pub(crate) fn to_db_version(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version).map_err(|_| RepositoryError::InvalidVersion(version))
}

pub(crate) fn from_db_version(raw: i64) -> Result<u64, RepositoryError> {
    u64::try_from(raw).map_err(|_| RepositoryError::Corrupt(format!("negative version {raw}")))
}

pub(crate) fn parse_status(raw: &str) -> Result<OrderStatus, RepositoryError> {
    raw.parse::<OrderStatus>()
        .map_err(|e| RepositoryError::Corrupt(e.to_string()))
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => RepositoryError::StorageUnavailable(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            RepositoryError::Corrupt(format!("failed to decode row in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::StorageUnavailable(format!("connection pool closed in {operation}"))
        }
        _ => RepositoryError::StorageUnavailable(format!("sqlx error in {operation}: {err}")),
    }
}

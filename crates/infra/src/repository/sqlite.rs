//! SQLite-backed status history.
//!
//! One table, `OrderStatusUpdates`: `OrderId` and the status names as TEXT, `Version`
//! as INTEGER, keyed by `(OrderId, Version)`.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use tracing::{debug, instrument};

use orderflow_core::OrderId;
use orderflow_orders::{OrderStatus, StatusUpdate, StatusUpdateRecord};

use super::r#trait::{OrderStatusRepository, RepositoryError};
use super::sql::{
    OwnedRuntime, block_on, from_db_version, is_unique_violation, map_sqlx_error, parse_status,
    to_db_version,
};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS OrderStatusUpdates (
        OrderId   TEXT    NOT NULL,
        OldStatus TEXT    NOT NULL,
        NewStatus TEXT    NOT NULL,
        Version   INTEGER NOT NULL,
        PRIMARY KEY (OrderId, Version)
    )
"#;

/// SQLite status history repository.
///
/// Opened with [`connect`](Self::connect), the sync [`OrderStatusRepository`] API drives
/// the pool on a runtime owned by the repository and must not be called from async code.
/// Async callers open it with [`connect_async`](Self::connect_async) and use the
/// `*_async` methods.
#[derive(Debug, Clone)]
pub struct SqliteOrderStatusRepository {
    pool: SqlitePool,
    runtime: Option<Arc<OwnedRuntime>>,
}

fn pool_settings(
    url: &str,
    max_connections: u32,
) -> Result<(SqliteConnectOptions, SqlitePoolOptions), RepositoryError> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| RepositoryError::StorageUnavailable(format!("invalid sqlite url: {e}")))?
        .create_if_missing(true);

    let pool_options = if url.contains(":memory:") || url.contains("mode=memory") {
        // An in-memory database lives only as long as a connection to it; pin one.
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    Ok((options, pool_options))
}

impl SqliteOrderStatusRepository {
    /// Open (creating if needed) the database at `url` and ensure the schema exists.
    ///
    /// Refused with `StorageUnavailable` when called from inside an async runtime.
    pub fn connect(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let runtime = Arc::new(OwnedRuntime::build("orderflow-sqlite")?);
        let (options, pool_options) = pool_settings(url, max_connections)?;

        let pool = block_on(Some(&*runtime), async {
            pool_options
                .connect_with(options)
                .await
                .map_err(|e| map_sqlx_error("connect", e))
        })?;

        let repo = Self {
            pool,
            runtime: Some(runtime),
        };
        repo.ensure_schema()?;
        debug!(url, "sqlite order status repository ready");
        Ok(repo)
    }

    /// Open the database on the caller's runtime. Only the `*_async` methods are usable.
    pub async fn connect_async(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let (options, pool_options) = pool_settings(url, max_connections)?;
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let repo = Self {
            pool,
            runtime: None,
        };
        repo.ensure_schema_async().await?;
        debug!(url, "sqlite order status repository ready (async)");
        Ok(repo)
    }

    /// Private in-memory database (tests/dev).
    pub fn in_memory() -> Result<Self, RepositoryError> {
        Self::connect("sqlite::memory:", 1)
    }

    fn run<F, T>(&self, fut: F) -> Result<T, RepositoryError>
    where
        F: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        block_on(self.runtime.as_deref(), fut)
    }

    pub async fn ensure_schema_async(&self) -> Result<(), RepositoryError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, update),
        fields(order_id = %update.order_id, version = update.version),
        err
    )]
    pub async fn add_order_status_update_async(
        &self,
        update: &StatusUpdate,
    ) -> Result<(), RepositoryError> {
        let version = to_db_version(update.version)?;

        sqlx::query(
            "INSERT INTO OrderStatusUpdates (OrderId, OldStatus, NewStatus, Version) VALUES (?, ?, ?, ?)",
        )
        .bind(update.order_id.to_string())
        .bind(update.old_status.as_str())
        .bind(update.new_status.as_str())
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::DuplicateVersion {
                    order_id: update.order_id,
                    version: update.version,
                }
            } else {
                map_sqlx_error("add_order_status_update", e)
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn update_status_async(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        version: u64,
    ) -> Result<u64, RepositoryError> {
        let db_version = to_db_version(version)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // No version predicate: every row of the order is rewritten.
        let result = sqlx::query(
            "UPDATE OrderStatusUpdates SET NewStatus = ?, Version = ? WHERE OrderId = ?",
        )
        .bind(new_status.as_str())
        .bind(db_version)
        .bind(order_id.to_string())
        .execute(&mut *tx)
        .await;

        match result {
            Ok(done) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit", e))?;
                Ok(done.rows_affected())
            }
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                if is_unique_violation(&e) {
                    Err(RepositoryError::DuplicateVersion { order_id, version })
                } else {
                    Err(map_sqlx_error("update_status", e))
                }
            }
        }
    }

    #[instrument(
        skip(self, update),
        fields(order_id = %update.order_id, version = update.version),
        err
    )]
    pub async fn overwrite_or_insert_async(
        &self,
        update: &StatusUpdate,
    ) -> Result<u64, RepositoryError> {
        let db_version = to_db_version(update.version)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        match overwrite_or_insert_in(&mut *tx, update, db_version).await {
            Ok(rows) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit", e))?;
                Ok(rows)
            }
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                if is_unique_violation(&e) {
                    Err(RepositoryError::DuplicateVersion {
                        order_id: update.order_id,
                        version: update.version,
                    })
                } else {
                    Err(map_sqlx_error("overwrite_or_insert", e))
                }
            }
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn get_order_status_updates_async(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusUpdateRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT OrderId, OldStatus, NewStatus, Version
            FROM OrderStatusUpdates
            WHERE OrderId = ?
            ORDER BY Version ASC
            "#,
        )
        .bind(order_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_order_status_updates", e))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn revert_to_version_async(
        &self,
        order_id: OrderId,
        target_version: u64,
    ) -> Result<u64, RepositoryError> {
        // Nothing stored can be above a target the column can't even hold.
        let Ok(target) = to_db_version(target_version) else {
            return Ok(0);
        };

        let done = sqlx::query("DELETE FROM OrderStatusUpdates WHERE OrderId = ? AND Version > ?")
            .bind(order_id.to_string())
            .bind(target)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("revert_to_version", e))?;

        Ok(done.rows_affected())
    }

    pub async fn latest_version_async(
        &self,
        order_id: OrderId,
    ) -> Result<Option<u64>, RepositoryError> {
        let row = sqlx::query("SELECT MAX(Version) FROM OrderStatusUpdates WHERE OrderId = ?")
            .bind(order_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("latest_version", e))?;

        let max: Option<i64> = row
            .try_get(0)
            .map_err(|e| map_sqlx_error("latest_version", e))?;
        max.map(from_db_version).transpose()
    }
}

/// The UPDATE takes the database write lock even when it matches nothing, so a
/// concurrent first transition for the same order waits instead of inserting a second row.
async fn overwrite_or_insert_in(
    conn: &mut SqliteConnection,
    update: &StatusUpdate,
    db_version: i64,
) -> Result<u64, sqlx::Error> {
    let order_id = update.order_id.to_string();

    let done = sqlx::query(
        "UPDATE OrderStatusUpdates SET NewStatus = ?, Version = ? WHERE OrderId = ?",
    )
    .bind(update.new_status.as_str())
    .bind(db_version)
    .bind(&order_id)
    .execute(&mut *conn)
    .await?;

    if done.rows_affected() > 0 {
        return Ok(done.rows_affected());
    }

    sqlx::query(
        "INSERT INTO OrderStatusUpdates (OrderId, OldStatus, NewStatus, Version) VALUES (?, ?, ?, ?)",
    )
    .bind(&order_id)
    .bind(update.old_status.as_str())
    .bind(update.new_status.as_str())
    .bind(db_version)
    .execute(&mut *conn)
    .await?;

    Ok(0)
}

fn decode_row(row: &SqliteRow) -> Result<StatusUpdateRecord, RepositoryError> {
    let order_id: String = row.try_get(0).map_err(|e| map_sqlx_error("decode_row", e))?;
    let old_status: String = row.try_get(1).map_err(|e| map_sqlx_error("decode_row", e))?;
    let new_status: String = row.try_get(2).map_err(|e| map_sqlx_error("decode_row", e))?;
    let version: i64 = row.try_get(3).map_err(|e| map_sqlx_error("decode_row", e))?;

    Ok(StatusUpdateRecord {
        order_id: order_id
            .parse::<OrderId>()
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
        old_status: parse_status(&old_status)?,
        new_status: parse_status(&new_status)?,
        version: from_db_version(version)?,
    })
}

impl OrderStatusRepository for SqliteOrderStatusRepository {
    fn ensure_schema(&self) -> Result<(), RepositoryError> {
        self.run(self.ensure_schema_async())
    }

    fn add_order_status_update(&self, update: &StatusUpdate) -> Result<(), RepositoryError> {
        self.run(self.add_order_status_update_async(update))
    }

    fn update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        version: u64,
    ) -> Result<u64, RepositoryError> {
        self.run(self.update_status_async(order_id, new_status, version))
    }

    fn overwrite_or_insert(&self, update: &StatusUpdate) -> Result<u64, RepositoryError> {
        self.run(self.overwrite_or_insert_async(update))
    }

    fn get_order_status_updates(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusUpdateRecord>, RepositoryError> {
        self.run(self.get_order_status_updates_async(order_id))
    }

    fn revert_to_version(
        &self,
        order_id: OrderId,
        target_version: u64,
    ) -> Result<u64, RepositoryError> {
        self.run(self.revert_to_version_async(order_id, target_version))
    }

    fn latest_version(&self, order_id: OrderId) -> Result<Option<u64>, RepositoryError> {
        self.run(self.latest_version_async(order_id))
    }
}

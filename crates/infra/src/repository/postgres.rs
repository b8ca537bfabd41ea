//! Postgres-backed status history.
//!
//! Same contract as the SQLite backend, with native column types: `order_id` is a
//! `UUID` and `version` a `BIGINT` constrained to be non-negative.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepositoryError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) | `23505` | `DuplicateVersion` | `(order_id, version)` already taken |
//! | Database (check constraint violation) | `23514` | `StorageUnavailable` | Negative version slipped through |
//! | Database (other) | Any other | `StorageUnavailable` | Other database errors |
//! | PoolClosed / Io / Tls | N/A | `StorageUnavailable` | Connection failures |
//! | Decode | N/A | `Corrupt` | Row didn't match the schema |
//!
//! ## Thread Safety
//!
//! `PostgresOrderStatusRepository` is `Send + Sync + Clone`; clones share one pool.

use std::sync::Arc;

use sqlx::Row;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use tracing::{Span, debug, instrument};
use uuid::Uuid;

use orderflow_core::OrderId;
use orderflow_orders::{OrderStatus, StatusUpdate, StatusUpdateRecord};

use super::r#trait::{OrderStatusRepository, RepositoryError};
use super::sql::{
    OwnedRuntime, block_on, from_db_version, is_unique_violation, map_sqlx_error, parse_status,
    to_db_version,
};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS order_status_updates (
        order_id   UUID   NOT NULL,
        old_status TEXT   NOT NULL,
        new_status TEXT   NOT NULL,
        version    BIGINT NOT NULL CHECK (version >= 0),
        PRIMARY KEY (order_id, version)
    )
"#;

/// Postgres status history repository.
///
/// Like the SQLite backend: [`connect`](Self::connect) owns a runtime for the sync trait
/// API, [`connect_async`](Self::connect_async) runs on the caller's runtime and serves
/// the `*_async` methods only.
#[derive(Debug, Clone)]
pub struct PostgresOrderStatusRepository {
    pool: PgPool,
    runtime: Option<Arc<OwnedRuntime>>,
}

impl PostgresOrderStatusRepository {
    /// Connect to `url` and ensure the schema exists.
    ///
    /// Refused with `StorageUnavailable` when called from inside an async runtime.
    pub fn connect(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let runtime = Arc::new(OwnedRuntime::build("orderflow-postgres")?);

        let pool = block_on(Some(&*runtime), async {
            PgPoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect(url)
                .await
                .map_err(|e| map_sqlx_error("connect", e))
        })?;

        let repo = Self {
            pool,
            runtime: Some(runtime),
        };
        repo.ensure_schema()?;
        debug!("postgres order status repository ready");
        Ok(repo)
    }

    pub async fn connect_async(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let repo = Self {
            pool,
            runtime: None,
        };
        repo.ensure_schema_async().await?;
        debug!("postgres order status repository ready (async)");
        Ok(repo)
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
            r#"
            INSERT INTO order_status_updates (order_id, old_status, new_status, version)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(update.order_id.as_uuid())
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

    #[instrument(skip(self), fields(order_id = %order_id, rows = tracing::field::Empty), err)]
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
            "UPDATE order_status_updates SET new_status = $1, version = $2 WHERE order_id = $3",
        )
        .bind(new_status.as_str())
        .bind(db_version)
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await;

        match result {
            Ok(done) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit", e))?;
                Span::current().record("rows", done.rows_affected());
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
        fields(order_id = %update.order_id, version = update.version, rows = tracing::field::Empty),
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
                Span::current().record("rows", rows);
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

    #[instrument(skip(self), fields(order_id = %order_id, record_count = tracing::field::Empty), err)]
    pub async fn get_order_status_updates_async(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusUpdateRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, old_status, new_status, version
            FROM order_status_updates
            WHERE order_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_order_status_updates", e))?;

        let records = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("record_count", records.len());
        Ok(records)
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn revert_to_version_async(
        &self,
        order_id: OrderId,
        target_version: u64,
    ) -> Result<u64, RepositoryError> {
        let Ok(target) = to_db_version(target_version) else {
            return Ok(0);
        };

        let done = sqlx::query("DELETE FROM order_status_updates WHERE order_id = $1 AND version > $2")
            .bind(order_id.as_uuid())
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
        let row = sqlx::query("SELECT MAX(version) FROM order_status_updates WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("latest_version", e))?;

        let max: Option<i64> = row
            .try_get(0)
            .map_err(|e| map_sqlx_error("latest_version", e))?;
        max.map(from_db_version).transpose()
    }
}

/// Serializes first transitions of one order with a transaction-scoped advisory lock:
/// with no row to lock yet, two writers would otherwise both see zero rows and insert.
async fn overwrite_or_insert_in(
    conn: &mut PgConnection,
    update: &StatusUpdate,
    db_version: i64,
) -> Result<u64, sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(update.order_id.to_string())
        .execute(&mut *conn)
        .await?;

    let done = sqlx::query(
        "UPDATE order_status_updates SET new_status = $1, version = $2 WHERE order_id = $3",
    )
    .bind(update.new_status.as_str())
    .bind(db_version)
    .bind(update.order_id.as_uuid())
    .execute(&mut *conn)
    .await?;

    if done.rows_affected() > 0 {
        return Ok(done.rows_affected());
    }

    sqlx::query(
        r#"
        INSERT INTO order_status_updates (order_id, old_status, new_status, version)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(update.order_id.as_uuid())
    .bind(update.old_status.as_str())
    .bind(update.new_status.as_str())
    .bind(db_version)
    .execute(&mut *conn)
    .await?;

    Ok(0)
}

fn decode_row(row: &PgRow) -> Result<StatusUpdateRecord, RepositoryError> {
    let order_id: Uuid = row.try_get(0).map_err(|e| map_sqlx_error("decode_row", e))?;
    let old_status: String = row.try_get(1).map_err(|e| map_sqlx_error("decode_row", e))?;
    let new_status: String = row.try_get(2).map_err(|e| map_sqlx_error("decode_row", e))?;
    let version: i64 = row.try_get(3).map_err(|e| map_sqlx_error("decode_row", e))?;

    Ok(StatusUpdateRecord {
        order_id: OrderId::from_uuid(order_id),
        old_status: parse_status(&old_status)?,
        new_status: parse_status(&new_status)?,
        version: from_db_version(version)?,
    })
}

impl OrderStatusRepository for PostgresOrderStatusRepository {
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

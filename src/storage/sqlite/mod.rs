//! SQLite implementations of storage interfaces.
//!
//! One `SqliteStore` implements every contract; each file holds the impls for
//! a group of related tables. Multi-statement updates run inside
//! `BEGIN IMMEDIATE` transactions.

mod earning_store;
mod operation_store;
mod rate_store;
mod tier_store;

use std::str::FromStr;
use std::time::Duration;

use backon::Retryable;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::{Result, StorageError};
use crate::utils::bootstrap::connection_backoff;

/// SQLite implementation of every cashback store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. Call [`SqliteStore::migrate`] before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database at `path` and apply migrations.
    ///
    /// `path` may be a file path, a `sqlite:` URL, or `sqlite::memory:`.
    pub async fn connect(path: &str) -> Result<Self> {
        let memory = path.is_empty() || path.contains(":memory:");
        let options = if memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path.trim_start_matches("sqlite:"))
                .create_if_missing(true)
        };

        let pool = (|| {
            let options = options.clone();
            async move {
                let builder = if memory {
                    // Every connection to :memory: is a separate database.
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                } else {
                    SqlitePoolOptions::new().max_connections(5)
                };
                builder.connect_with(options).await
            }
        })
        .retry(connection_backoff())
        .notify(|err: &sqlx::Error, dur: Duration| {
            warn!(path = %path, error = %err, delay = ?dur, "SQLite connection failed, retrying");
        })
        .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        info!(path = %path, "SQLite storage ready");
        Ok(store)
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("migrations/sqlite").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a connection and take the write lock upfront.
    ///
    /// BEGIN IMMEDIATE prevents deadlocks when concurrent DEFERRED
    /// transactions race to upgrade from shared to exclusive.
    async fn begin(&self) -> Result<PoolConnection<Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }
}

/// Commit on success, roll back on error.
async fn finish<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}

/// Fixed-width RFC3339 so stored timestamps sort lexically.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Decode(format!("timestamp {raw:?}: {e}")))
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| StorageError::Decode(format!("decimal {raw:?}: {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Decode(format!("uuid {raw:?}: {e}")))
}

fn get_string(row: &SqliteRow, col: &str) -> Result<String> {
    Ok(row.try_get::<String, _>(col)?)
}

fn get_opt_string(row: &SqliteRow, col: &str) -> Result<Option<String>> {
    Ok(row.try_get::<Option<String>, _>(col)?)
}

fn get_decimal(row: &SqliteRow, col: &str) -> Result<Decimal> {
    parse_decimal(&get_string(row, col)?)
}

fn get_opt_decimal(row: &SqliteRow, col: &str) -> Result<Option<Decimal>> {
    get_opt_string(row, col)?
        .map(|raw| parse_decimal(&raw))
        .transpose()
}

fn get_uuid(row: &SqliteRow, col: &str) -> Result<Uuid> {
    parse_uuid(&get_string(row, col)?)
}

fn get_opt_uuid(row: &SqliteRow, col: &str) -> Result<Option<Uuid>> {
    get_opt_string(row, col)?.map(|raw| parse_uuid(&raw)).transpose()
}

fn get_ts(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>> {
    parse_ts(&get_string(row, col)?)
}

fn get_opt_ts(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>> {
    get_opt_string(row, col)?.map(|raw| parse_ts(&raw)).transpose()
}

fn get_u64(row: &SqliteRow, col: &str) -> Result<u64> {
    let value: i64 = row.try_get(col)?;
    u64::try_from(value).map_err(|e| StorageError::Decode(format!("{col}: {e}")))
}

fn get_u32(row: &SqliteRow, col: &str) -> Result<u32> {
    let value: i64 = row.try_get(col)?;
    u32::try_from(value).map_err(|e| StorageError::Decode(format!("{col}: {e}")))
}

fn get_bool(row: &SqliteRow, col: &str) -> Result<bool> {
    Ok(row.try_get::<bool, _>(col)?)
}

fn opt_string<T: ToString>(value: Option<T>) -> Option<String> {
    value.map(|v| v.to_string())
}

fn opt_ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(fmt_ts)
}

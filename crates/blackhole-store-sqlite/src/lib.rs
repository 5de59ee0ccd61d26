//! SQLite ban store
//!
//! Persists bans in a single table:
//!
//! ```sql
//! CREATE TABLE bans (address TEXT NOT NULL UNIQUE, expiry_ts INTEGER);
//! ```
//!
//! Addresses are stored in their canonical text form. Every statement binds
//! its values as parameters.
//!
//! Opening the store (connect, schema) is done once at startup and its
//! failures are fatal to the caller. Failures of the individual operations
//! are returned as [`Error::Store`] and left to the engine to classify.

use async_trait::async_trait;
use blackhole_core::traits::{BanRecord, BanStore};
use blackhole_core::{Error, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS bans (address TEXT NOT NULL UNIQUE, expiry_ts INTEGER)";

const CREATE_INDEX: &str = "CREATE INDEX IF NOT EXISTS bans_expiry_ts ON bans (expiry_ts)";

/// SQLite-backed [`BanStore`]
#[derive(Clone)]
pub struct SqliteBanStore {
    pool: SqlitePool,
}

impl SqliteBanStore {
    /// Connection acquire timeout
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Open (or create) the store at `path` and ensure the schema exists
    ///
    /// `:memory:` opens a private in-memory database that lives as long as
    /// the store.
    pub async fn open(path: &str) -> Result<Self> {
        let options = if path == ":memory:" {
            // Unique name per store so parallel tests do not share a database
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:blackhole-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );
            SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true)
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        // The engine is the only user and never issues concurrent queries
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::store(format!("failed to open {}: {}", path, e)))?;

        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| Error::store(format!("failed to create bans table: {}", e)))?;

        sqlx::query(CREATE_INDEX)
            .execute(&pool)
            .await
            .map_err(|e| Error::store(format!("failed to create expiry index: {}", e)))?;

        info!(path = %path, "Ban store opened");

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_error(operation: &str, err: sqlx::Error) -> Error {
    Error::store(format!("db({}): {}", operation, err))
}

/// Turn a stored row into a record, skipping rows the daemon did not write
fn parse_row(address: String, expiry_ts: Option<i64>) -> Option<BanRecord> {
    let Ok(parsed) = address.parse::<IpAddr>() else {
        warn!(address = %address, "Ignoring ban row with malformed address");
        return None;
    };
    let Some(expires_at) = expiry_ts else {
        warn!(address = %address, "Ignoring ban row without expiry");
        return None;
    };
    Some(BanRecord::new(parsed, expires_at))
}

#[async_trait]
impl BanStore for SqliteBanStore {
    async fn upsert(&self, address: IpAddr, expires_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bans (address, expiry_ts) VALUES (?, ?)
            ON CONFLICT(address) DO UPDATE SET expiry_ts = excluded.expiry_ts
            "#,
        )
        .bind(address.to_string())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("upsert", e))?;

        Ok(())
    }

    async fn query_expired(&self, now: i64) -> Result<Vec<IpAddr>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT address FROM bans WHERE expiry_ts < ?")
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("query_expired", e))?;

        Ok(rows
            .into_iter()
            .filter_map(|(address,)| match address.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(address = %address, "Ignoring ban row with malformed address");
                    None
                }
            })
            .collect())
    }

    async fn delete(&self, address: IpAddr) -> Result<()> {
        sqlx::query("DELETE FROM bans WHERE address = ?")
            .bind(address.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete", e))?;

        Ok(())
    }

    async fn get(&self, address: IpAddr) -> Result<Option<BanRecord>> {
        let row: Option<(String, Option<i64>)> =
            sqlx::query_as("SELECT address, expiry_ts FROM bans WHERE address = ?")
                .bind(address.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("get", e))?;

        Ok(row.and_then(|(address, expiry_ts)| parse_row(address, expiry_ts)))
    }

    async fn list(&self) -> Result<Vec<BanRecord>> {
        let rows: Vec<(String, Option<i64>)> =
            sqlx::query_as("SELECT address, expiry_ts FROM bans ORDER BY expiry_ts")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("list", e))?;

        Ok(rows
            .into_iter()
            .filter_map(|(address, expiry_ts)| parse_row(address, expiry_ts))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("Ban store closed");
        Ok(())
    }
}

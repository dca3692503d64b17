// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local store manager (embedded SQLite).
//!
//! The store opens lazily on first use:
//!
//! ```text
//! open() ──► durable file (sqlite://path?mode=rwc, WAL journaling)
//!              │ fails
//!              ▼
//!            in-memory (sqlite::memory:)      ← durability degrades, functionality does not
//!              │ fails
//!              ▼
//!            StorageError::Unavailable        ← next call tries again
//! ```
//!
//! A single pooled connection serializes every read and write, which is the
//! whole concurrency model: one channel per store, no row or table locks.
//! The same single connection keeps an in-memory database alive for the
//! lifetime of the store.
//!
//! ## sqlx Any Driver Quirks
//!
//! Values are decoded by trying the declared storage class first and falling
//! back to the others, because SQLite keeps whatever storage class a value was
//! written with regardless of column affinity.

use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::statement::Statement;
use super::traits::StorageError;
use crate::schema::{ColumnType, FieldValue};

/// Connection string for the in-memory fallback.
pub const MEMORY_URL: &str = "sqlite::memory:";

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Where the store ended up after opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Backed by a file; survives restarts.
    Durable,
    /// Backed by memory; lost on close.
    Memory,
}

struct StoreHandle {
    pool: AnyPool,
    mode: StoreMode,
}

/// Owner of the local SQLite connection.
///
/// Cheap to share behind an `Arc`; every entity cache of one engine uses the
/// same store.
pub struct LocalStore {
    path: Option<PathBuf>,
    handle: OnceCell<StoreHandle>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .field("mode", &self.mode())
            .finish()
    }
}

impl LocalStore {
    /// Store backed by a file at `path`, falling back to memory if it can't be opened.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            handle: OnceCell::new(),
        }
    }

    /// Store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            handle: OnceCell::new(),
        }
    }

    /// Store for an optional path (`None` = in-memory).
    #[must_use]
    pub fn from_config(path: Option<&str>) -> Self {
        match path {
            Some(p) if !p.trim().is_empty() => Self::new(p),
            _ => Self::in_memory(),
        }
    }

    /// Open the store if not already open.
    ///
    /// Idempotent; concurrent callers share one in-flight initialization.
    pub async fn open(&self) -> Result<StoreMode, StorageError> {
        self.handle().await.map(|h| h.mode)
    }

    /// Mode of an already-open store.
    #[must_use]
    pub fn mode(&self) -> Option<StoreMode> {
        self.handle.get().map(|h| h.mode)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.get().is_some_and(|h| !h.pool.is_closed())
    }

    async fn handle(&self) -> Result<&StoreHandle, StorageError> {
        self.handle.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<StoreHandle, StorageError> {
        install_drivers();

        if let Some(ref path) = self.path {
            let url = format!("sqlite://{}?mode=rwc", path.display());
            match Self::connect_url(&url).await {
                Ok(pool) => {
                    if let Err(e) = Self::enable_wal_mode(&pool).await {
                        warn!(error = %e, "Failed to enable WAL journaling, continuing with default journal");
                    }
                    info!(path = %path.display(), "Local store opened (durable)");
                    return Ok(StoreHandle {
                        pool,
                        mode: StoreMode::Durable,
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Durable local store unavailable, falling back to memory");
                    crate::metrics::record_store_fallback();
                }
            }
        }

        let pool = Self::connect_url(MEMORY_URL).await.map_err(|e| {
            crate::metrics::record_store_error("open");
            StorageError::Unavailable(format!("Failed to open in-memory store: {}", e))
        })?;
        info!("Local store opened (in-memory)");
        Ok(StoreHandle {
            pool,
            mode: StoreMode::Memory,
        })
    }

    async fn connect_url(url: &str) -> Result<AnyPool, sqlx::Error> {
        AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
    }

    /// WAL journaling: readers don't block the writer, one fsync per commit.
    async fn enable_wal_mode(pool: &AnyPool) -> Result<(), sqlx::Error> {
        sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(pool).await?;
        Ok(())
    }

    /// Run a statement and return its rows.
    pub async fn query(&self, stmt: Statement) -> Result<Vec<AnyRow>, StorageError> {
        let handle = self.handle().await?;
        let (sql, params) = stmt.into_parts();
        let rows = bind_params(sqlx::query(&sql), params)
            .fetch_all(&handle.pool)
            .await
            .map_err(|e| {
                debug!(sql = %sql, error = %e, "Local query failed");
                StorageError::from(e)
            })?;
        Ok(rows)
    }

    /// Run a statement, returning the number of affected rows.
    pub async fn execute(&self, stmt: Statement) -> Result<u64, StorageError> {
        let handle = self.handle().await?;
        let (sql, params) = stmt.into_parts();
        let result = bind_params(sqlx::query(&sql), params)
            .execute(&handle.pool)
            .await
            .map_err(|e| {
                debug!(sql = %sql, error = %e, "Local statement failed");
                StorageError::from(e)
            })?;
        Ok(result.rows_affected())
    }

    /// Run several statements in one transaction (all or nothing).
    #[instrument(skip(self, stmts), fields(statements = stmts.len()))]
    pub async fn execute_batch(&self, stmts: Vec<Statement>) -> Result<u64, StorageError> {
        let handle = self.handle().await?;
        let mut tx = handle.pool.begin().await?;
        let mut affected = 0;
        for stmt in stmts {
            let (sql, params) = stmt.into_parts();
            let result = bind_params(sqlx::query(&sql), params)
                .execute(&mut *tx)
                .await?;
            affected += result.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    /// Best-effort durability checkpoint. No-op for in-memory stores.
    pub async fn flush(&self) {
        let Some(handle) = self.handle.get() else {
            return;
        };
        if handle.mode != StoreMode::Durable || handle.pool.is_closed() {
            return;
        }
        match sqlx::query("PRAGMA wal_checkpoint(PASSIVE)").execute(&handle.pool).await {
            Ok(_) => debug!("Local store checkpointed"),
            Err(e) => {
                warn!(error = %e, "Local store checkpoint failed");
                crate::metrics::record_store_error("flush");
            }
        }
    }

    /// Spawn [`flush`](Self::flush) without waiting for it.
    pub fn flush_in_background(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            store.flush().await;
        });
    }

    /// Flush and close the connection. Later operations report `Unavailable`.
    pub async fn close(&self) {
        if let Some(handle) = self.handle.get() {
            self.flush().await;
            handle.pool.close().await;
            info!("Local store closed");
        }
    }
}

/// Bind stored values positionally. Booleans are stored as `0`/`1`.
fn bind_params<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: Vec<FieldValue>,
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param {
            FieldValue::Null => query.bind(None::<String>),
            FieldValue::Integer(v) => query.bind(v),
            FieldValue::Real(v) => query.bind(v),
            FieldValue::Boolean(v) => query.bind(i64::from(v)),
            FieldValue::Text(v) => query.bind(v),
        };
    }
    query
}

/// Decode column `index` of a row for a declared column type.
#[must_use]
pub fn decode_value(row: &AnyRow, index: usize, column_type: ColumnType) -> FieldValue {
    let integer = || row.try_get::<Option<i64>, _>(index).ok().flatten().map(FieldValue::Integer);
    let real = || row.try_get::<Option<f64>, _>(index).ok().flatten().map(FieldValue::Real);
    let text = || row.try_get::<Option<String>, _>(index).ok().flatten().map(FieldValue::Text);

    let decoded = match column_type {
        ColumnType::Integer | ColumnType::Boolean => integer().or_else(real).or_else(text),
        ColumnType::Real => real().or_else(integer).or_else(text),
        ColumnType::Text | ColumnType::Timestamp => text().or_else(integer).or_else(real),
    };

    match (column_type, decoded) {
        (_, None) => FieldValue::Null,
        (ColumnType::Boolean, Some(FieldValue::Integer(i))) => FieldValue::Boolean(i != 0),
        (ColumnType::Boolean, Some(FieldValue::Real(f))) => FieldValue::Boolean(f != 0.0),
        (_, Some(value)) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_table() -> LocalStore {
        let store = LocalStore::in_memory();
        store
            .execute(Statement::new(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, flag INTEGER)",
            ))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let store = LocalStore::in_memory();
        assert!(!store.is_open());
        assert_eq!(store.open().await.unwrap(), StoreMode::Memory);
        assert_eq!(store.open().await.unwrap(), StoreMode::Memory);
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn test_concurrent_open_shares_one_init() {
        let store = Arc::new(LocalStore::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&store);
                tokio::spawn(async move { s.open().await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), StoreMode::Memory);
        }
        // Same connection everywhere: a table created once is visible to all.
        store.execute(Statement::new("CREATE TABLE shared (id INTEGER)")).await.unwrap();
        let rows = store
            .query(Statement::new("SELECT name FROM sqlite_master WHERE name = 'shared'"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_bound_values_round_trip() {
        let store = store_with_table().await;
        store
            .execute(
                Statement::new("INSERT INTO t (id, name, score, flag) VALUES (?, ?, ?, ?)")
                    .bind(1_i64)
                    .bind("alpha")
                    .bind(2.5_f64)
                    .bind(true),
            )
            .await
            .unwrap();
        store
            .execute(
                Statement::new("INSERT INTO t (id, name, score, flag) VALUES (?, ?, ?, ?)")
                    .bind(2_i64)
                    .bind(FieldValue::Null)
                    .bind(FieldValue::Null)
                    .bind(false),
            )
            .await
            .unwrap();

        let rows = store
            .query(Statement::new("SELECT id, name, score, flag FROM t ORDER BY id"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(decode_value(&rows[0], 1, ColumnType::Text), FieldValue::Text("alpha".into()));
        assert_eq!(decode_value(&rows[0], 2, ColumnType::Real), FieldValue::Real(2.5));
        assert_eq!(decode_value(&rows[0], 3, ColumnType::Boolean), FieldValue::Boolean(true));
        assert_eq!(decode_value(&rows[1], 1, ColumnType::Text), FieldValue::Null);
        assert_eq!(decode_value(&rows[1], 3, ColumnType::Boolean), FieldValue::Boolean(false));
    }

    #[tokio::test]
    async fn test_execute_batch_is_atomic() {
        let store = store_with_table().await;
        let result = store
            .execute_batch(vec![
                Statement::new("INSERT INTO t (id, name) VALUES (?, ?)").bind(1_i64).bind("a"),
                Statement::new("INSERT INTO missing_table (id) VALUES (?)").bind(2_i64),
            ])
            .await;
        assert!(result.is_err());

        let rows = store.query(Statement::new("SELECT id FROM t")).await.unwrap();
        assert!(rows.is_empty(), "first insert must be rolled back");
    }

    #[tokio::test]
    async fn test_durable_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");

        {
            let store = LocalStore::new(&path);
            assert_eq!(store.open().await.unwrap(), StoreMode::Durable);
            store.execute(Statement::new("CREATE TABLE keep (id INTEGER)")).await.unwrap();
            store.execute(Statement::new("INSERT INTO keep (id) VALUES (7)")).await.unwrap();
            store.close().await;
        }

        let reopened = LocalStore::new(&path);
        let rows = reopened.query(Statement::new("SELECT id FROM keep")).await.unwrap();
        assert_eq!(decode_value(&rows[0], 0, ColumnType::Integer), FieldValue::Integer(7));
    }

    #[tokio::test]
    async fn test_unopenable_path_falls_back_to_memory() {
        let store = LocalStore::new("/nonexistent-dir/for/sure/mirror.db");
        assert_eq!(store.open().await.unwrap(), StoreMode::Memory);
        store.execute(Statement::new("CREATE TABLE x (id INTEGER)")).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = store_with_table().await;
        store.close().await;
        let Err(err) = store.query(Statement::new("SELECT 1")).await else {
            panic!("closed store answered a query");
        };
        assert!(err.is_unavailable());
        assert!(!store.is_open());
    }
}

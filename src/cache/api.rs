// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local reads and writes.
//!
//! Host-facing:
//! - `get_all()` / `get()` / `count()` / `ids()`
//! - `upsert()` - insert-or-replace one record, Created vs Updated by presence
//! - `bulk_upsert()` - chunked multi-row insert, one aggregate event
//! - `remove()` - delete by primary key
//! - `replace_all()` - wipe + insert in one transaction
//!
//! The crate-internal row helpers below them are what the validator and the
//! repair protocol use; they report raw [`StorageError`]s instead of neutral
//! results.

use sqlx::any::AnyRow;
use tracing::{debug, instrument, warn};

use super::{CacheError, CacheEvent, EntityCache};
use crate::schema::{FieldValue, Record, Row};
use crate::storage::{decode_value, placeholders, quote_ident, Statement, StorageError};

/// SQLite's historic default limit on bound parameters per statement.
const MAX_BOUND_PARAMS: usize = 999;

impl EntityCache {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Reads
    // ═══════════════════════════════════════════════════════════════════════════

    /// Every row, ordered by primary key, through the output transforms.
    pub async fn get_all(&self) -> Result<Vec<Record>, CacheError> {
        if !self.ready().await {
            return Ok(Vec::new());
        }
        let rows = self.settle("get_all", self.load_rows().await, Vec::new())?;
        Ok(rows.iter().map(|r| self.schema.record_from_row(r)).collect())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Record>, CacheError> {
        if !self.ready().await {
            return Ok(None);
        }
        let rows = self.settle("get", self.load_rows_in_range(id, id).await, Vec::new())?;
        Ok(rows.first().map(|r| self.schema.record_from_row(r)))
    }

    pub async fn count(&self) -> Result<u64, CacheError> {
        if !self.ready().await {
            return Ok(0);
        }
        self.settle("count", self.local_count().await, 0)
    }

    /// Primary keys, ascending.
    pub async fn ids(&self) -> Result<Vec<i64>, CacheError> {
        if !self.ready().await {
            return Ok(Vec::new());
        }
        self.settle("ids", self.local_ids().await, Vec::new())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Writes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Insert or replace one record.
    ///
    /// Returns false when the store is unavailable. A record without an
    /// integer primary key is rejected with [`CacheError::InvalidRecord`].
    #[instrument(skip(self, record), fields(table = %self.schema.table_name()))]
    pub async fn upsert(&self, record: Record) -> Result<bool, CacheError> {
        let row = self.schema.row_from_record(&record)?;
        if !self.ready().await {
            return Ok(false);
        }

        let id = row.id;
        let existed = self.settle("upsert", self.exists(id).await, false)?;
        let rows = [row];
        let written = self
            .with_schema_retry(|| self.insert_rows(&rows))
            .await
            .map(|_| true);
        if !self.settle("upsert", written, false)? {
            return Ok(false);
        }

        let table = self.schema.table_name().to_string();
        let record = self.schema.record_from_row(&rows[0]);
        self.events.emit(if existed {
            CacheEvent::Updated { table, id, record }
        } else {
            CacheEvent::Created { table, id, record }
        });
        self.store.flush_in_background();
        self.spawn_validation();
        Ok(true)
    }

    /// Insert or replace many records in chunks of `bulk_chunk_size`.
    ///
    /// Invalid records and failing chunks are skipped. Returns the number of
    /// rows written.
    pub async fn bulk_upsert(&self, records: Vec<Record>) -> Result<usize, CacheError> {
        self.bulk_upsert_chunked(records, self.config.bulk_chunk_size).await
    }

    /// [`bulk_upsert`](Self::bulk_upsert) with an explicit rows-per-statement
    /// count, still capped by the bound parameter limit.
    #[instrument(skip(self, records), fields(table = %self.schema.table_name(), records = records.len()))]
    pub async fn bulk_upsert_chunked(&self, records: Vec<Record>, chunk_size: usize) -> Result<usize, CacheError> {
        let rows = self.rows_from_records(&records);
        if rows.is_empty() || !self.ready().await {
            return Ok(0);
        }

        let (ids, failure) = self.write_rows(&rows, chunk_size).await;
        if ids.is_empty() {
            if let Some(e) = failure {
                return self.settle("bulk_upsert", Err(e), 0);
            }
            return Ok(0);
        }

        let written = ids.len();
        self.events.emit(CacheEvent::BulkUpdated {
            table: self.schema.table_name().to_string(),
            ids,
        });
        self.store.flush_in_background();
        Ok(written)
    }

    /// Delete one row. Returns whether a row was removed.
    #[instrument(skip(self), fields(table = %self.schema.table_name()))]
    pub async fn remove(&self, id: i64) -> Result<bool, CacheError> {
        if !self.ready().await {
            return Ok(false);
        }
        let ids = [id];
        let result = self.with_schema_retry(|| self.delete_chunk(&ids)).await;
        let removed = self.settle("remove", result, 0)? > 0;
        if removed {
            self.events.emit(CacheEvent::Deleted {
                table: self.schema.table_name().to_string(),
                id,
            });
            self.store.flush_in_background();
            self.spawn_validation();
        }
        Ok(removed)
    }

    /// Atomically replace the whole table.
    #[instrument(skip(self, records), fields(table = %self.schema.table_name(), records = records.len()))]
    pub async fn replace_all(&self, records: Vec<Record>) -> Result<usize, CacheError> {
        if !self.ready().await {
            return Ok(0);
        }
        let rows = self.rows_from_records(&records);
        let result = self.replace_rows(&rows).await;
        let count = self.settle("replace_all", result, 0)?;
        self.spawn_validation();
        Ok(count)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Row helpers (validator & repair)
    // ═══════════════════════════════════════════════════════════════════════════

    /// All stored rows, ascending by id.
    pub(crate) async fn load_rows(&self) -> Result<Vec<Row>, StorageError> {
        self.with_schema_retry(|| async move {
            let sql = format!("{} ORDER BY {}", self.select_sql(), quote_ident(self.schema.id_field()));
            let rows = self.store.query(Statement::new(sql)).await?;
            Ok(rows.iter().filter_map(|r| self.decode_row(r)).collect())
        })
        .await
    }

    /// Stored rows with `start <= id <= end`, ascending.
    pub(crate) async fn load_rows_in_range(&self, start: i64, end: i64) -> Result<Vec<Row>, StorageError> {
        self.with_schema_retry(|| async move {
            let id = quote_ident(self.schema.id_field());
            let sql = format!("{} WHERE {id} >= ? AND {id} <= ? ORDER BY {id}", self.select_sql());
            let rows = self
                .store
                .query(Statement::new(sql).bind(start).bind(end))
                .await?;
            Ok(rows.iter().filter_map(|r| self.decode_row(r)).collect())
        })
        .await
    }

    pub(crate) async fn local_count(&self) -> Result<u64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(self.schema.table_name()));
        let rows = self.store.query(Statement::new(sql)).await?;
        let count = rows
            .first()
            .and_then(|r| decode_value(r, 0, crate::schema::ColumnType::Integer).as_i64())
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub(crate) async fn local_ids(&self) -> Result<Vec<i64>, StorageError> {
        let id = quote_ident(self.schema.id_field());
        let sql = format!(
            "SELECT {id} FROM {} ORDER BY {id}",
            quote_ident(self.schema.table_name())
        );
        let rows = self.store.query(Statement::new(sql)).await?;
        Ok(rows
            .iter()
            .filter_map(|r| decode_value(r, 0, crate::schema::ColumnType::Integer).as_i64())
            .collect())
    }

    /// Write rows chunk by chunk, skipping failing chunks.
    ///
    /// Returns the ids written and the last chunk failure, if any.
    pub(crate) async fn write_rows(&self, rows: &[Row], chunk_size: usize) -> (Vec<i64>, Option<StorageError>) {
        let mut written = Vec::with_capacity(rows.len());
        let mut failure = None;
        for chunk in rows.chunks(self.rows_per_statement(chunk_size)) {
            match self.with_schema_retry(|| self.insert_rows(chunk)).await {
                Ok(_) => written.extend(chunk.iter().map(|r| r.id)),
                Err(e) => {
                    warn!(table = %self.schema.table_name(), rows = chunk.len(), error = %e, "Skipping failed write chunk");
                    crate::metrics::record_chunk_failure(self.schema.table_name(), "write");
                    failure = Some(e);
                }
            }
        }
        (written, failure)
    }

    /// Delete rows by id in chunks, skipping failing chunks.
    pub(crate) async fn delete_ids(&self, ids: &[i64]) -> usize {
        let mut deleted = 0;
        for chunk in ids.chunks(MAX_BOUND_PARAMS) {
            match self.with_schema_retry(|| self.delete_chunk(chunk)).await {
                Ok(n) => deleted += usize::try_from(n).unwrap_or(0),
                Err(e) => {
                    warn!(table = %self.schema.table_name(), ids = chunk.len(), error = %e, "Skipping failed delete chunk");
                    crate::metrics::record_chunk_failure(self.schema.table_name(), "delete");
                }
            }
        }
        deleted
    }

    /// Wipe and insert in one transaction, then announce `Replaced`.
    pub(crate) async fn replace_rows(&self, rows: &[Row]) -> Result<usize, StorageError> {
        self.with_schema_retry(|| async move {
            let mut stmts = vec![Statement::new(format!(
                "DELETE FROM {}",
                quote_ident(self.schema.table_name())
            ))];
            stmts.extend(rows.chunks(self.rows_per_statement(self.config.bulk_chunk_size)).map(|c| self.insert_statement(c)));
            self.store.execute_batch(stmts).await
        })
        .await?;

        debug!(table = %self.schema.table_name(), rows = rows.len(), "Table replaced");
        self.events.emit(CacheEvent::Replaced {
            table: self.schema.table_name().to_string(),
            count: rows.len(),
        });
        self.store.flush_in_background();
        Ok(rows.len())
    }

    /// Convert wire records, dropping the ones without a usable primary key.
    pub(crate) fn rows_from_records(&self, records: &[Record]) -> Vec<Row> {
        records
            .iter()
            .filter_map(|record| match self.schema.row_from_record(record) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(table = %self.schema.table_name(), error = %e, "Skipping invalid record");
                    None
                }
            })
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SQL
    // ═══════════════════════════════════════════════════════════════════════════

    fn select_sql(&self) -> String {
        let columns: Vec<String> = self.schema.columns().iter().map(|c| quote_ident(&c.name)).collect();
        format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            quote_ident(self.schema.table_name())
        )
    }

    fn decode_row(&self, row: &AnyRow) -> Option<Row> {
        let values: Vec<FieldValue> = self
            .schema
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, c)| decode_value(row, idx, c.column_type))
            .collect();
        let id = values.get(self.schema.id_index())?.as_i64()?;
        Some(Row { id, values })
    }

    fn rows_per_statement(&self, chunk_size: usize) -> usize {
        let columns = self.schema.columns().len().max(1);
        chunk_size.min(MAX_BOUND_PARAMS / columns).max(1)
    }

    fn insert_statement(&self, rows: &[Row]) -> Statement {
        let columns = self.schema.columns();
        let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
        let tuple = format!("({})", placeholders(columns.len()));
        let values = vec![tuple.as_str(); rows.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES {}",
            quote_ident(self.schema.table_name()),
            names.join(", "),
            values
        );
        rows.iter().fold(Statement::new(sql), |stmt, row| {
            stmt.bind_all((0..columns.len()).map(|idx| row.value(idx).clone()))
        })
    }

    async fn insert_rows(&self, rows: &[Row]) -> Result<u64, StorageError> {
        self.store.execute(self.insert_statement(rows)).await
    }

    async fn delete_chunk(&self, ids: &[i64]) -> Result<u64, StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_ident(self.schema.table_name()),
            quote_ident(self.schema.id_field()),
            placeholders(ids.len())
        );
        self.store.execute(Statement::new(sql).bind_all(ids.iter().copied())).await
    }

    async fn exists(&self, id: i64) -> Result<bool, StorageError> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?",
            quote_ident(self.schema.table_name()),
            quote_ident(self.schema.id_field())
        );
        let rows = self.store.query(Statement::new(sql).bind(id)).await?;
        Ok(!rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use super::MAX_BOUND_PARAMS;
    use crate::config::MirrorConfig;
    use crate::remote::MemoryAuthority;
    use crate::schema::{ColumnDescriptor, Record};
    use crate::storage::LocalStore;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("tasks", "/api/tasks")
            .column(ColumnDescriptor::integer("id").primary_key())
            .column(ColumnDescriptor::text("title"))
            .column(ColumnDescriptor::boolean("is_done"))
    }

    fn cache_with(store: Arc<LocalStore>, config: MirrorConfig) -> Arc<EntityCache> {
        let authority = Arc::new(MemoryAuthority::new());
        EntityCache::new(
            descriptor(),
            store,
            authority.clone(),
            authority,
            Arc::new(config),
            Arc::new(EventBus::new()),
        )
        .unwrap()
    }

    fn cache() -> Arc<EntityCache> {
        cache_with(Arc::new(LocalStore::in_memory()), MirrorConfig::manual())
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let cache = cache();
        assert!(cache.upsert(record(json!({"id": 1, "title": "a", "is_done": true}))).await.unwrap());

        let got = cache.get(1).await.unwrap().unwrap();
        assert_eq!(got.get("title"), Some(&json!("a")));
        assert_eq!(got.get("is_done"), Some(&json!(true)));
        assert_eq!(cache.get(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_emits_created_then_updated() {
        let cache = cache();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache.events.subscribe(move |e| sink.lock().push(e.kind()));

        cache.upsert(record(json!({"id": 1, "title": "a"}))).await.unwrap();
        cache.upsert(record(json!({"id": 1, "title": "b"}))).await.unwrap();
        cache.remove(1).await.unwrap();

        assert_eq!(*seen.lock(), vec!["created", "updated", "deleted"]);
    }

    #[tokio::test]
    async fn test_upsert_rejects_record_without_id() {
        let cache = cache();
        let err = cache.upsert(record(json!({"title": "orphan"}))).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn test_bulk_upsert_chunks_and_emits_once() {
        let config = MirrorConfig {
            bulk_chunk_size: 7,
            ..MirrorConfig::manual()
        };
        let cache = cache_with(Arc::new(LocalStore::in_memory()), config);
        let events = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&events);
        cache.events.subscribe(move |_| *sink.lock() += 1);

        let records: Vec<Record> = (1..=50)
            .map(|i| record(json!({"id": i, "title": format!("t{}", i)})))
            .collect();
        assert_eq!(cache.bulk_upsert(records).await.unwrap(), 50);
        assert_eq!(cache.count().await.unwrap(), 50);
        assert_eq!(*events.lock(), 1);
    }

    #[tokio::test]
    async fn test_bulk_upsert_chunked_uses_call_chunk_size() {
        let cache = cache();
        assert_eq!(cache.rows_per_statement(3), 3);
        assert_eq!(cache.rows_per_statement(0), 1);
        assert_eq!(cache.rows_per_statement(usize::MAX), MAX_BOUND_PARAMS / cache.schema.columns().len());

        let records: Vec<Record> = (1..=10)
            .map(|i| record(json!({"id": i, "title": format!("t{}", i)})))
            .collect();
        assert_eq!(cache.bulk_upsert_chunked(records, 3).await.unwrap(), 10);
        assert_eq!(cache.ids().await.unwrap(), (1..=10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_bulk_upsert_skips_invalid_records() {
        let cache = cache();
        let written = cache
            .bulk_upsert(vec![
                record(json!({"id": 1, "title": "ok"})),
                record(json!({"title": "no id"})),
            ])
            .await
            .unwrap();
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn test_replace_all_wipes_previous_rows() {
        let cache = cache();
        cache
            .bulk_upsert((1..=5).map(|i| record(json!({"id": i}))).collect())
            .await
            .unwrap();
        let replaced = cache
            .replace_all(vec![record(json!({"id": 10})), record(json!({"id": 11}))])
            .await
            .unwrap();
        assert_eq!(replaced, 2);
        assert_eq!(cache.ids().await.unwrap(), vec![10, 11]);
    }

    #[tokio::test]
    async fn test_remove_missing_row_is_false() {
        let cache = cache();
        assert!(!cache.remove(99).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_store_returns_neutral_results() {
        let store = Arc::new(LocalStore::in_memory());
        let cache = cache_with(Arc::clone(&store), MirrorConfig::manual());
        cache.upsert(record(json!({"id": 1}))).await.unwrap();
        store.close().await;

        assert_eq!(cache.get_all().await.unwrap(), Vec::<Record>::new());
        assert_eq!(cache.count().await.unwrap(), 0);
        assert!(!cache.upsert(record(json!({"id": 2}))).await.unwrap());
        assert!(!cache.remove(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_init_adds_missing_columns_without_data_loss() {
        let store = Arc::new(LocalStore::in_memory());
        let old = cache_with(Arc::clone(&store), MirrorConfig::manual());
        old.upsert(record(json!({"id": 1, "title": "keep me"}))).await.unwrap();

        let authority = Arc::new(MemoryAuthority::new());
        let new = EntityCache::new(
            descriptor().column(ColumnDescriptor::integer("priority")),
            store,
            authority.clone(),
            authority,
            Arc::new(MirrorConfig::manual()),
            Arc::new(EventBus::new()),
        )
        .unwrap();
        assert!(new.init().await);
        assert!(new.init().await, "second init is a no-op");

        let row = new.get(1).await.unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&json!("keep me")));
        assert_eq!(row.get("priority"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_missing_column_is_migrated_on_write() {
        let store = Arc::new(LocalStore::in_memory());
        let cache = cache_with(Arc::clone(&store), MirrorConfig::manual());
        assert!(cache.init().await);

        // Simulate a table created by an older build without `is_done`.
        store
            .execute_batch(vec![
                Statement::new("DROP TABLE tasks"),
                Statement::new("CREATE TABLE tasks (id INTEGER PRIMARY KEY, title TEXT)"),
            ])
            .await
            .unwrap();

        assert!(cache.upsert(record(json!({"id": 3, "title": "x", "is_done": true}))).await.unwrap());
        let got = cache.get(3).await.unwrap().unwrap();
        assert_eq!(got.get("is_done"), Some(&json!(true)));
    }
}

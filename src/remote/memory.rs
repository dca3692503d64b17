// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process authority.
//!
//! Serves both the REST resource surface and the integrity endpoints from
//! an in-memory table, hashing with the same [`TableHasher`] the caches use.
//! Tests and demos use it as an offline server; switches simulate the
//! degraded behaviours the validator has to cope with.
//!
//! ```
//! use entity_mirror::remote::MemoryAuthority;
//! use entity_mirror::schema::{ColumnDescriptor, EntityDescriptor};
//! use serde_json::json;
//!
//! let authority = MemoryAuthority::new();
//! authority.register(
//!     EntityDescriptor::new("tasks", "/api/tasks")
//!         .column(ColumnDescriptor::integer("id").primary_key())
//!         .column(ColumnDescriptor::text("title")),
//! ).unwrap();
//!
//! authority.insert("tasks", json!({"id": 1, "title": "Write docs"})).unwrap();
//! assert_eq!(authority.count("tasks"), 1);
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::traits::{
    AuthorityGlobal, DebugHash, IdRange, IntegrityAuthority, ListParams, Page, RemoteError,
    RemoteSource,
};
use crate::merkle::{row_expression, BlockHash, RowHash, TableHasher, DEFAULT_BLOCK_SIZE};
use crate::schema::{EntityDescriptor, Record, Row, Schema, SchemaError};

/// How the integrity endpoints answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityMode {
    /// Normal operation.
    #[default]
    Available,
    /// `{globalHash: null}`: integrity not computed for the table.
    NoHash,
    /// Every integrity endpoint answers 404.
    ClientError,
    /// Every integrity endpoint answers 503.
    ServerError,
}

/// How by-ID and batch fetches answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    #[default]
    Normal,
    /// Every fetch answers 503.
    Fail,
    /// Fetches succeed with no records, whatever was asked for.
    Empty,
    /// Every n-th fetch (counted from the last mode change) answers 503.
    FailEveryNth(usize),
}

struct AuthorityTable {
    schema: Schema,
    rows: BTreeMap<i64, Row>,
}

/// Offline authority over in-memory tables.
pub struct MemoryAuthority {
    hasher: TableHasher,
    tables: RwLock<HashMap<String, AuthorityTable>>,
    endpoints: RwLock<HashMap<String, String>>,
    integrity_mode: RwLock<IntegrityMode>,
    id_ranges_enabled: AtomicBool,
    batch_fetch_enabled: AtomicBool,
    list_failing: AtomicBool,
    fetch_mode: RwLock<FetchMode>,
    fetch_calls: AtomicUsize,
    fetch_log: Mutex<Vec<i64>>,
    block_log: Mutex<Vec<i64>>,
    list_calls: AtomicUsize,
}

impl Default for MemoryAuthority {
    fn default() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }
}

impl MemoryAuthority {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_block_size(block_size: i64) -> Self {
        Self {
            hasher: TableHasher::new(block_size),
            tables: RwLock::new(HashMap::new()),
            endpoints: RwLock::new(HashMap::new()),
            integrity_mode: RwLock::new(IntegrityMode::Available),
            id_ranges_enabled: AtomicBool::new(true),
            batch_fetch_enabled: AtomicBool::new(true),
            list_failing: AtomicBool::new(false),
            fetch_mode: RwLock::new(FetchMode::Normal),
            fetch_calls: AtomicUsize::new(0),
            fetch_log: Mutex::new(Vec::new()),
            block_log: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Serve an entity. Keyed by its authority table name and endpoint.
    pub fn register(&self, descriptor: EntityDescriptor) -> Result<(), SchemaError> {
        let schema = Schema::compile(descriptor)?;
        let table = schema.authority_table().to_string();
        self.endpoints
            .write()
            .insert(schema.endpoint().to_string(), table.clone());
        self.tables.write().insert(
            table,
            AuthorityTable {
                schema,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Switches
    // ---------------------------------------------------------------------

    pub fn set_integrity_mode(&self, mode: IntegrityMode) {
        *self.integrity_mode.write() = mode;
    }

    /// With ID ranges off, the endpoint answers 404 and callers paginate.
    pub fn set_id_ranges_enabled(&self, enabled: bool) {
        self.id_ranges_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_batch_fetch_enabled(&self, enabled: bool) {
        self.batch_fetch_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Make the list endpoint answer 503.
    pub fn set_list_failing(&self, failing: bool) {
        self.list_failing.store(failing, Ordering::SeqCst);
    }

    /// Degrade by-ID and batch fetches. Resets the fetch call counter.
    pub fn set_fetch_mode(&self, mode: FetchMode) {
        *self.fetch_mode.write() = mode;
        self.fetch_calls.store(0, Ordering::SeqCst);
    }

    // ---------------------------------------------------------------------
    // Data
    // ---------------------------------------------------------------------

    /// Insert or replace one record.
    pub fn insert(&self, table: &str, record: Value) -> Result<i64, SchemaError> {
        let Value::Object(record) = record else {
            return Err(SchemaError::InvalidRecord("record must be a JSON object".into()));
        };
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| SchemaError::InvalidRecord(format!("unknown table '{}'", table)))?;
        let row = entry.schema.row_from_record(&record)?;
        let id = row.id;
        entry.rows.insert(id, row);
        Ok(id)
    }

    pub fn insert_many<I>(&self, table: &str, records: I) -> Result<usize, SchemaError>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut inserted = 0;
        for record in records {
            self.insert(table, record)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    pub fn remove(&self, table: &str, id: i64) -> bool {
        self.tables
            .write()
            .get_mut(table)
            .is_some_and(|t| t.rows.remove(&id).is_some())
    }

    /// Overwrite one field of an existing row.
    pub fn set_field(&self, table: &str, id: i64, field: &str, value: Value) -> Result<(), SchemaError> {
        let mut record = self
            .record(table, id)
            .ok_or_else(|| SchemaError::InvalidRecord(format!("no row {} in '{}'", id, table)))?;
        record.insert(field.to_string(), value);
        self.insert(table, Value::Object(record)).map(|_| ())
    }

    #[must_use]
    pub fn record(&self, table: &str, id: i64) -> Option<Record> {
        let tables = self.tables.read();
        let entry = tables.get(table)?;
        entry.rows.get(&id).map(|row| entry.schema.record_from_row(row))
    }

    #[must_use]
    pub fn records(&self, table: &str) -> Vec<Record> {
        let tables = self.tables.read();
        tables.get(table).map_or_else(Vec::new, |t| {
            t.rows.values().map(|r| t.schema.record_from_row(r)).collect()
        })
    }

    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    // ---------------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------------

    /// IDs requested through by-ID or batch fetches, in request order.
    #[must_use]
    pub fn fetched_ids(&self) -> Vec<i64> {
        self.fetch_log.lock().clone()
    }

    /// Block ids whose row hashes were requested, in request order.
    #[must_use]
    pub fn requested_blocks(&self) -> Vec<i64> {
        self.block_log.lock().clone()
    }

    pub fn clear_fetch_log(&self) {
        self.fetch_log.lock().clear();
        self.block_log.lock().clear();
        self.list_calls.store(0, Ordering::SeqCst);
    }

    /// Number of list pages served since the last [`clear_fetch_log`](Self::clear_fetch_log).
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn table_for_endpoint(&self, endpoint: &str) -> Result<String, RemoteError> {
        self.endpoints
            .read()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| RemoteError::Client {
                status: 404,
                message: format!("no resource at {}", endpoint),
            })
    }

    fn check_integrity(&self) -> Result<(), RemoteError> {
        match *self.integrity_mode.read() {
            IntegrityMode::ClientError => Err(RemoteError::Client {
                status: 404,
                message: "integrity endpoints not available".into(),
            }),
            IntegrityMode::ServerError => Err(RemoteError::Server {
                status: 503,
                message: "integrity service unavailable".into(),
            }),
            IntegrityMode::Available | IntegrityMode::NoHash => Ok(()),
        }
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&AuthorityTable) -> T,
    ) -> Result<T, RemoteError> {
        let tables = self.tables.read();
        let entry = tables.get(table).ok_or_else(|| RemoteError::Client {
            status: 404,
            message: format!("unknown table '{}'", table),
        })?;
        Ok(f(entry))
    }

    fn fetch(&self, endpoint: &str, ids: &[i64]) -> Result<Vec<Record>, RemoteError> {
        let table = self.table_for_endpoint(endpoint)?;
        self.fetch_log.lock().extend_from_slice(ids);
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match *self.fetch_mode.read() {
            FetchMode::Normal => {}
            FetchMode::Empty => return Ok(Vec::new()),
            FetchMode::FailEveryNth(n) if n == 0 || call % n != 0 => {}
            FetchMode::Fail | FetchMode::FailEveryNth(_) => {
                return Err(RemoteError::Server {
                    status: 503,
                    message: format!("fetch {} unavailable", call),
                })
            }
        }
        self.with_table(&table, |t| {
            ids.iter()
                .filter_map(|id| t.rows.get(id))
                .map(|row| t.schema.record_from_row(row))
                .collect()
        })
    }

    fn store_record(&self, endpoint: &str, record: &Record, id: Option<i64>) -> Result<Record, RemoteError> {
        let table = self.table_for_endpoint(endpoint)?;
        let mut tables = self.tables.write();
        let entry = tables.get_mut(&table).ok_or_else(|| RemoteError::Client {
            status: 404,
            message: format!("unknown table '{}'", table),
        })?;

        let mut record = record.clone();
        let id_field = entry.schema.id_field().to_string();
        let id = match id.or_else(|| record.get(&id_field).and_then(Value::as_i64)) {
            Some(id) => id,
            None => entry.rows.keys().next_back().map_or(1, |max| max + 1),
        };
        record.insert(id_field, Value::from(id));

        let row = entry.schema.row_from_record(&record).map_err(|e| RemoteError::Client {
            status: 422,
            message: e.to_string(),
        })?;
        let canonical = entry.schema.record_from_row(&row);
        entry.rows.insert(id, row);
        Ok(canonical)
    }

    fn block_rows_of(&self, t: &AuthorityTable, block_id: i64) -> Vec<Row> {
        let (start, end) = self.hasher.block_range(block_id);
        t.rows.range(start..=end).map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl RemoteSource for MemoryAuthority {
    async fn list(&self, endpoint: &str, params: &ListParams) -> Result<Page, RemoteError> {
        if self.list_failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Server {
                status: 503,
                message: "list unavailable".into(),
            });
        }
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let table = self.table_for_endpoint(endpoint)?;
        let page = params.page.max(1) as usize;
        let size = params.page_size.max(1);
        self.with_table(&table, |t| {
            let skip = (page - 1).saturating_mul(size);
            let items = t
                .rows
                .values()
                .skip(skip)
                .take(size)
                .map(|r| t.schema.record_from_row(r))
                .collect();
            Page {
                items,
                has_more: skip.saturating_add(size) < t.rows.len(),
            }
        })
    }

    async fn fetch_by_ids(&self, endpoint: &str, ids: &[i64]) -> Result<Vec<Record>, RemoteError> {
        self.fetch(endpoint, ids)
    }

    async fn batch_fetch(&self, endpoint: &str, ids: &[i64]) -> Result<Vec<Record>, RemoteError> {
        if !self.batch_fetch_enabled.load(Ordering::SeqCst) {
            return Err(RemoteError::Client {
                status: 404,
                message: "batch-fetch not available".into(),
            });
        }
        self.fetch(endpoint, ids)
    }

    async fn create(&self, endpoint: &str, record: &Record) -> Result<Record, RemoteError> {
        self.store_record(endpoint, record, None)
    }

    async fn update(&self, endpoint: &str, id: i64, record: &Record) -> Result<Record, RemoteError> {
        let table = self.table_for_endpoint(endpoint)?;
        if !self.with_table(&table, |t| t.rows.contains_key(&id))? {
            return Err(RemoteError::Client {
                status: 404,
                message: format!("no row {}", id),
            });
        }
        self.store_record(endpoint, record, Some(id))
    }

    async fn delete(&self, endpoint: &str, id: i64) -> Result<(), RemoteError> {
        let table = self.table_for_endpoint(endpoint)?;
        if self.remove(&table, id) {
            Ok(())
        } else {
            Err(RemoteError::Client {
                status: 404,
                message: format!("no row {}", id),
            })
        }
    }
}

#[async_trait]
impl IntegrityAuthority for MemoryAuthority {
    async fn global(&self, table: &str) -> Result<AuthorityGlobal, RemoteError> {
        self.check_integrity()?;
        let no_hash = *self.integrity_mode.read() == IntegrityMode::NoHash;
        self.with_table(table, |t| {
            let rows: Vec<Row> = t.rows.values().cloned().collect();
            let global = self.hasher.table_hash(&t.schema, &rows);
            AuthorityGlobal {
                global_hash: (!no_hash).then_some(global.global_hash),
                row_count: global.row_count,
            }
        })
    }

    async fn id_ranges(&self, table: &str) -> Result<Vec<IdRange>, RemoteError> {
        self.check_integrity()?;
        if !self.id_ranges_enabled.load(Ordering::SeqCst) {
            return Err(RemoteError::Client {
                status: 404,
                message: "id-ranges not available".into(),
            });
        }
        self.with_table(table, |t| {
            let ids: Vec<i64> = t.rows.keys().copied().collect();
            IdRange::from_sorted_ids(&ids)
        })
    }

    async fn blocks(&self, table: &str) -> Result<Vec<BlockHash>, RemoteError> {
        self.check_integrity()?;
        self.with_table(table, |t| {
            let rows: Vec<Row> = t.rows.values().cloned().collect();
            self.hasher.blocks(&self.hasher.row_hashes(&t.schema, &rows))
        })
    }

    async fn block_rows(&self, table: &str, block_id: i64) -> Result<Vec<RowHash>, RemoteError> {
        self.check_integrity()?;
        self.block_log.lock().push(block_id);
        self.with_table(table, |t| {
            let rows = self.block_rows_of(t, block_id);
            self.hasher.row_hashes(&t.schema, &rows)
        })
    }

    async fn debug_row(&self, table: &str, id: i64) -> Result<DebugHash, RemoteError> {
        self.check_integrity()?;
        self.with_table(table, |t| match t.rows.get(&id) {
            Some(row) => DebugHash {
                expression: Some(row_expression(&t.schema, row)),
                hash: Some(self.hasher.row_hash(&t.schema, row).row_hash),
            },
            None => DebugHash::default(),
        })
    }

    async fn debug_block(&self, table: &str, block_id: i64) -> Result<DebugHash, RemoteError> {
        self.check_integrity()?;
        self.with_table(table, |t| {
            let rows = self.block_rows_of(t, block_id);
            let hashes = self.hasher.row_hashes(&t.schema, &rows);
            let expression: String = hashes.iter().map(|h| h.row_hash.as_str()).collect();
            let hash = self.hasher.blocks(&hashes).pop().map(|b| b.block_hash);
            DebugHash {
                expression: Some(expression),
                hash,
            }
        })
    }

    async fn debug_global(&self, table: &str) -> Result<DebugHash, RemoteError> {
        self.check_integrity()?;
        self.with_table(table, |t| {
            let rows: Vec<Row> = t.rows.values().cloned().collect();
            let blocks = self.hasher.blocks(&self.hasher.row_hashes(&t.schema, &rows));
            let expression: String = blocks.iter().map(|b| b.block_hash.as_str()).collect();
            DebugHash {
                expression: Some(expression),
                hash: Some(self.hasher.global(&blocks).global_hash),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDescriptor;
    use serde_json::json;

    fn authority() -> MemoryAuthority {
        let authority = MemoryAuthority::new();
        authority
            .register(
                EntityDescriptor::new("tasks", "/api/tasks")
                    .column(ColumnDescriptor::integer("id").primary_key())
                    .column(ColumnDescriptor::text("title")),
            )
            .unwrap();
        authority
    }

    #[tokio::test]
    async fn test_list_pages() {
        let authority = authority();
        authority
            .insert_many("tasks", (1..=5).map(|i| json!({"id": i, "title": format!("t{}", i)})))
            .unwrap();

        let first = authority.list("/api/tasks", &ListParams::first_page(2)).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);

        let last = authority
            .list("/api/tasks", &ListParams { page: 3, page_size: 2, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(!last.has_more);
        assert_eq!(authority.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_logs_requested_ids() {
        let authority = authority();
        authority.insert("tasks", json!({"id": 1, "title": "a"})).unwrap();
        let records = authority.fetch_by_ids("/api/tasks", &[1, 2]).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(authority.fetched_ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fetch_modes() {
        let authority = authority();
        authority.insert("tasks", json!({"id": 1, "title": "a"})).unwrap();

        authority.set_fetch_mode(FetchMode::Empty);
        assert!(authority.batch_fetch("/api/tasks", &[1]).await.unwrap().is_empty());

        authority.set_fetch_mode(FetchMode::Fail);
        assert!(authority.fetch_by_ids("/api/tasks", &[1]).await.unwrap_err().is_transient());

        authority.set_fetch_mode(FetchMode::FailEveryNth(2));
        let outcomes: Vec<bool> = four_fetches(&authority).await;
        assert_eq!(outcomes, vec![true, false, true, false]);

        authority.set_fetch_mode(FetchMode::Normal);
        assert_eq!(authority.fetch_by_ids("/api/tasks", &[1]).await.unwrap().len(), 1);
    }

    async fn four_fetches(authority: &MemoryAuthority) -> Vec<bool> {
        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(authority.fetch_by_ids("/api/tasks", &[1]).await.is_ok());
        }
        outcomes
    }

    #[tokio::test]
    async fn test_integrity_modes() {
        let authority = authority();
        authority.insert("tasks", json!({"id": 1, "title": "a"})).unwrap();

        let global = authority.global("tasks").await.unwrap();
        assert!(global.global_hash.is_some());
        assert_eq!(global.row_count, 1);

        authority.set_integrity_mode(IntegrityMode::NoHash);
        assert_eq!(authority.global("tasks").await.unwrap().global_hash, None);

        authority.set_integrity_mode(IntegrityMode::ClientError);
        assert!(authority.global("tasks").await.unwrap_err().is_client_error());

        authority.set_integrity_mode(IntegrityMode::ServerError);
        assert!(authority.blocks("tasks").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_create_assigns_next_id() {
        let authority = authority();
        authority.insert("tasks", json!({"id": 41, "title": "a"})).unwrap();
        let mut record = Record::new();
        record.insert("title".into(), json!("b"));
        let created = authority.create("/api/tasks", &record).await.unwrap();
        assert_eq!(created.get("id"), Some(&json!(42)));
        assert_eq!(authority.count("tasks"), 2);
    }

    #[tokio::test]
    async fn test_debug_global_matches_global() {
        let authority = authority();
        authority.insert("tasks", json!({"id": 3, "title": "c"})).unwrap();
        let debug = authority.debug_global("tasks").await.unwrap();
        let global = authority.global("tasks").await.unwrap();
        assert_eq!(debug.hash, global.global_hash);
    }
}

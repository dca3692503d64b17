// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Generic entity cache.
//!
//! One [`EntityCache`] mirrors one server table into a local SQLite table
//! whose columns come straight from the entity's column descriptors.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──► init() ──► CREATE TABLE IF NOT EXISTS
//!              │       PRAGMA table_info  ──► ALTER TABLE ADD COLUMN (missing only)
//!              │
//!              └─ first success ──► periodic validation timer (weak ref)
//! ```
//!
//! Every operation initializes lazily, so `init()` is optional for hosts.
//!
//! # Degradation
//!
//! - Store unavailable: operations return neutral results (empty, 0, false).
//! - Missing column: migrate once, retry once, then neutral result.
//! - Other backend failures come back as [`CacheError::Storage`].

mod api;
mod events;
mod remote_api;

pub use events::{CacheEvent, EventBus, SubscriptionId};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::MirrorConfig;
use crate::merkle::TableHasher;
use crate::remote::{IntegrityAuthority, RemoteError, RemoteSource};
use crate::schema::{EntityDescriptor, Schema, SchemaError};
use crate::storage::{decode_value, quote_ident, LocalStore, Statement, StorageError};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Schema(SchemaError),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<SchemaError> for CacheError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::InvalidRecord(msg) => Self::InvalidRecord(msg),
            other => Self::Schema(other),
        }
    }
}

/// Local mirror of one server table.
pub struct EntityCache {
    pub(crate) schema: Schema,
    pub(crate) store: Arc<LocalStore>,
    pub(crate) remote: Arc<dyn RemoteSource>,
    pub(crate) authority: Arc<dyn IntegrityAuthority>,
    pub(crate) config: Arc<MirrorConfig>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) hasher: TableHasher,

    /// Reentrancy guard: set while a validation pass runs
    pub(crate) validating: AtomicBool,

    /// Table created and migrated at least once
    initialized: AtomicBool,

    /// Periodic validation task
    timer: Mutex<Option<JoinHandle<()>>>,

    self_ref: Weak<EntityCache>,
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("table", &self.schema.table_name())
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .field("validating", &self.validating.load(Ordering::Relaxed))
            .finish()
    }
}

impl EntityCache {
    /// Compile the descriptor and build a cache over a shared store.
    pub fn new(
        descriptor: EntityDescriptor,
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteSource>,
        authority: Arc<dyn IntegrityAuthority>,
        config: Arc<MirrorConfig>,
        events: Arc<EventBus>,
    ) -> Result<Arc<Self>, SchemaError> {
        let schema = Schema::compile(descriptor)?;
        let hasher = TableHasher::new(config.block_size);
        Ok(Arc::new_cyclic(|self_ref| Self {
            schema,
            store,
            remote,
            authority,
            config,
            events,
            hasher,
            validating: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            timer: Mutex::new(None),
            self_ref: self_ref.clone(),
        }))
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        self.schema.table_name()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether a validation pass is running right now.
    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.validating.load(Ordering::Acquire)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Initialization & migration
    // ═══════════════════════════════════════════════════════════════════════

    /// Create the backing table if absent and add any missing columns.
    ///
    /// Returns false if the store is unavailable; a later call tries again.
    pub async fn init(&self) -> bool {
        let table = self.schema.table_name();
        match self.create_and_migrate().await {
            Ok(()) => {
                let first = !self.initialized.swap(true, Ordering::AcqRel);
                if first {
                    info!(table, "Entity cache initialized");
                    self.arm_timer();
                }
                true
            }
            Err(e) => {
                if e.is_unavailable() {
                    warn!(table, error = %e, "Entity cache init deferred, store unavailable");
                } else {
                    error!(table, error = %e, "Entity cache init failed");
                }
                crate::metrics::record_store_error("init");
                false
            }
        }
    }

    /// Initialize on first use.
    pub(crate) async fn ready(&self) -> bool {
        if self.is_initialized() && self.store.is_open() {
            return true;
        }
        self.init().await
    }

    async fn create_and_migrate(&self) -> Result<(), StorageError> {
        self.store.open().await?;

        let columns: Vec<String> = self
            .schema
            .columns()
            .iter()
            .map(|c| {
                let pk = if c.primary_key { " PRIMARY KEY" } else { "" };
                format!("{} {}{}", quote_ident(&c.name), c.column_type.sql_type(), pk)
            })
            .collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(self.schema.table_name()),
            columns.join(", ")
        );
        self.store.execute(Statement::new(sql)).await?;

        self.migrate().await
    }

    /// Add declared columns the live table lacks. Existing data is untouched.
    pub(crate) async fn migrate(&self) -> Result<(), StorageError> {
        let table = self.schema.table_name();
        let live = self.live_columns().await?;
        let missing: Vec<_> = self
            .schema
            .columns()
            .iter()
            .filter(|c| !live.contains(&c.name))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut added = 0;
        for column in missing {
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(table),
                quote_ident(&column.name),
                column.column_type.sql_type()
            );
            match self.store.execute(Statement::new(sql)).await {
                Ok(_) => {
                    info!(table, column = %column.name, "Added column");
                    added += 1;
                }
                // Another migration got there first
                Err(e) if e.is_duplicate_column() => {
                    debug!(table, column = %column.name, "Column already exists");
                }
                Err(e) => return Err(e),
            }
        }
        crate::metrics::record_migration(table, added);
        Ok(())
    }

    async fn live_columns(&self) -> Result<HashSet<String>, StorageError> {
        let sql = format!("PRAGMA table_info({})", quote_ident(self.schema.table_name()));
        let rows = self.store.query(Statement::new(sql)).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                decode_value(row, 1, crate::schema::ColumnType::Text)
                    .as_text()
                    .map(str::to_string)
            })
            .collect())
    }

    /// Run a store operation; on a missing column migrate once and retry once.
    pub(crate) async fn with_schema_retry<T, F, Fut>(&self, op: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        match op().await {
            Err(e) if e.is_missing_column() => {
                warn!(table = %self.schema.table_name(), error = %e, "Schema drift detected, migrating and retrying");
                self.migrate().await?;
                op().await
            }
            other => other,
        }
    }

    /// Map store-unavailable and persistent schema drift to a neutral result.
    pub(crate) fn settle<T>(
        &self,
        operation: &str,
        result: Result<T, StorageError>,
        neutral: T,
    ) -> Result<T, CacheError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_unavailable() || e.is_missing_column() => {
                warn!(table = %self.schema.table_name(), operation, error = %e, "Local store degraded, returning neutral result");
                crate::metrics::record_store_error(operation);
                Ok(neutral)
            }
            Err(e) => {
                error!(table = %self.schema.table_name(), operation, error = %e, "Local store operation failed");
                crate::metrics::record_store_error(operation);
                Err(e.into())
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Validation triggers
    // ═══════════════════════════════════════════════════════════════════════

    /// Arm the periodic validation timer (once).
    fn arm_timer(&self) {
        if !self.config.auto_validate {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let mut slot = self.timer.lock();
        if slot.is_some() {
            return;
        }

        let weak = self.self_ref.clone();
        let period = self.config.validation_interval();
        let table = self.schema.table_name().to_string();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let report = cache.validate().await;
                debug!(table = %table, outcome = %report.outcome, "Periodic validation finished");
            }
        }));
        debug!(table = %self.schema.table_name(), ?period, "Validation timer armed");
    }

    #[must_use]
    pub fn timer_armed(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the periodic timer. In-flight passes run to completion.
    pub fn stop_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }

    /// Fire-and-forget validation after a local write.
    pub(crate) fn spawn_validation(&self) {
        if !self.config.validate_after_write || self.is_validating() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let Some(cache) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let report = cache.validate().await;
            debug!(table = %cache.table_name(), outcome = %report.outcome, "Post-write validation finished");
        });
    }
}

impl Drop for EntityCache {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::{SkipReason, ValidationOutcome};
    use crate::remote::MemoryAuthority;
    use crate::schema::{ColumnDescriptor, Record};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("notes", "/api/notes")
            .column(ColumnDescriptor::integer("id").primary_key())
            .column(ColumnDescriptor::text("body"))
    }

    fn note(id: i64) -> Value {
        json!({"id": id, "body": format!("note {}", id)})
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn setup(rows: i64, config: MirrorConfig) -> (Arc<MemoryAuthority>, Arc<EntityCache>) {
        let authority = Arc::new(MemoryAuthority::new());
        authority.register(descriptor()).unwrap();
        authority.insert_many("notes", (1..=rows).map(note)).unwrap();
        let cache = EntityCache::new(
            descriptor(),
            Arc::new(LocalStore::in_memory()),
            authority.clone(),
            authority.clone(),
            Arc::new(config),
            Arc::new(EventBus::new()),
        )
        .unwrap();
        (authority, cache)
    }

    /// Poll `check` until it holds, failing after a few seconds.
    async fn eventually<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn test_first_init_arms_timer_and_first_tick_populates() {
        let (authority, cache) = setup(20, MirrorConfig {
            auto_validate: true,
            validate_after_write: false,
            validation_interval_secs: 3600,
            ..MirrorConfig::default()
        });
        assert!(!cache.timer_armed());

        assert!(cache.init().await);
        assert!(cache.init().await);
        assert!(cache.timer_armed());

        eventually("periodic pass to populate", || async { cache.count().await.unwrap() == 20 }).await;
        eventually("periodic pass to finish", || async { !cache.is_validating() }).await;
        assert_eq!(authority.list_calls(), 1, "one tick, one bootstrap listing");

        cache.stop_timer();
        assert!(!cache.timer_armed());
    }

    #[tokio::test]
    async fn test_manual_config_never_arms_timer() {
        let (_authority, cache) = setup(3, MirrorConfig::manual());
        assert!(cache.init().await);
        assert!(!cache.timer_armed());
    }

    #[tokio::test]
    async fn test_local_writes_trigger_validation() {
        let (_authority, cache) = setup(3, MirrorConfig {
            auto_validate: false,
            validate_after_write: true,
            ..MirrorConfig::default()
        });

        cache.upsert(record(note(1))).await.unwrap();
        eventually("post-upsert pass to fetch", || async { cache.count().await.unwrap() == 3 }).await;
        eventually("post-upsert pass to finish", || async { !cache.is_validating() }).await;

        assert!(cache.remove(3).await.unwrap());
        eventually("post-remove pass to restore the row", || async {
            cache.get(3).await.unwrap().is_some()
        })
        .await;
    }

    #[tokio::test]
    async fn test_trigger_during_running_pass_is_dropped() {
        let (authority, cache) = setup(3, MirrorConfig {
            auto_validate: false,
            validate_after_write: true,
            ..MirrorConfig::default()
        });

        cache.validating.store(true, Ordering::SeqCst);
        cache.upsert(record(note(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(authority.list_calls(), 0);
        assert!(authority.fetched_ids().is_empty());
        assert_eq!(cache.count().await.unwrap(), 1);
        cache.validating.store(false, Ordering::SeqCst);

        let (first, second) = tokio::join!(cache.validate(), cache.validate());
        let skipped = ValidationOutcome::Skipped(SkipReason::AlreadyRunning);
        assert_eq!([&first, &second].iter().filter(|r| r.outcome == skipped).count(), 1);
        assert!(first.is_healthy() || second.is_healthy());
        assert_eq!(cache.count().await.unwrap(), 3);
    }
}

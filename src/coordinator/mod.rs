// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirror engine coordinator.
//!
//! The [`MirrorEngine`] owns what entity caches share: the local store, the
//! remote collaborators, the configuration and the event bus. Caches are
//! registered once per entity and looked up by table name.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use entity_mirror::{ColumnDescriptor, EngineState, EntityDescriptor, MemoryAuthority, MirrorConfig, MirrorEngine};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let authority = Arc::new(MemoryAuthority::new());
//! let engine = MirrorEngine::new(MirrorConfig::default(), authority.clone(), authority);
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! let tasks = engine
//!     .register(
//!         EntityDescriptor::new("tasks", "/api/tasks")
//!             .column(ColumnDescriptor::integer("id").primary_key())
//!             .column(ColumnDescriptor::text("title")),
//!     )
//!     .unwrap();
//! engine.start().await.unwrap();
//! let report = tasks.validate().await;
//! println!("{}", report.outcome);
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::EngineState;

use std::collections::BTreeMap;
use std::sync::Arc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::{CacheEvent, EntityCache, EventBus, SubscriptionId};
use crate::config::MirrorConfig;
use crate::integrity::ValidationReport;
use crate::remote::{IntegrityAuthority, RemoteSource};
use crate::schema::{EntityDescriptor, SchemaError};
use crate::storage::LocalStore;

/// Registry of entity caches over one shared local store.
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct MirrorEngine {
    pub(super) config: Arc<MirrorConfig>,
    pub(super) store: Arc<LocalStore>,
    remote: Arc<dyn RemoteSource>,
    authority: Arc<dyn IntegrityAuthority>,
    events: Arc<EventBus>,
    pub(super) caches: RwLock<BTreeMap<String, Arc<EntityCache>>>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,
}

impl MirrorEngine {
    /// Engine whose store follows `config.db_path` (`None` = in-memory).
    pub fn new(
        config: MirrorConfig,
        remote: Arc<dyn RemoteSource>,
        authority: Arc<dyn IntegrityAuthority>,
    ) -> Self {
        let store = Arc::new(LocalStore::from_config(config.db_path.as_deref()));
        Self::with_store(config, store, remote, authority)
    }

    /// Engine over an injected store, e.g. one shared with another engine.
    pub fn with_store(
        config: MirrorConfig,
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteSource>,
        authority: Arc<dyn IntegrityAuthority>,
    ) -> Self {
        let (state, state_rx) = watch::channel(EngineState::Created);
        Self {
            config: Arc::new(config),
            store,
            remote,
            authority,
            events: Arc::new(EventBus::new()),
            caches: RwLock::new(BTreeMap::new()),
            state,
            state_rx,
        }
    }

    /// Compile a descriptor and register its cache.
    ///
    /// On a running engine the new cache is initialized on first use.
    pub fn register(&self, descriptor: EntityDescriptor) -> Result<Arc<EntityCache>, SchemaError> {
        let mut caches = self.caches.write();
        if caches.contains_key(&descriptor.table_name) {
            return Err(SchemaError::DuplicateEntity(descriptor.table_name));
        }

        let cache = EntityCache::new(
            descriptor,
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            Arc::clone(&self.authority),
            Arc::clone(&self.config),
            Arc::clone(&self.events),
        )?;
        info!(table = %cache.table_name(), "Entity registered");
        caches.insert(cache.table_name().to_string(), Arc::clone(&cache));
        Ok(cache)
    }

    #[must_use]
    pub fn entity(&self, table: &str) -> Option<Arc<EntityCache>> {
        self.caches.read().get(table).cloned()
    }

    /// Registered table names, sorted.
    #[must_use]
    pub fn entities(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Subscribe to events from every registered entity.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Validate every entity in table-name order.
    pub async fn validate_all(&self) -> Vec<ValidationReport> {
        let caches: Vec<Arc<EntityCache>> = self.caches.read().values().cloned().collect();
        let mut reports = Vec::with_capacity(caches.len());
        for cache in caches {
            let report = cache.validate().await;
            if !report.is_healthy() {
                warn!(table = %report.table, outcome = %report.outcome, "Entity not healthy");
            }
            reports.push(report);
        }
        reports
    }

    #[must_use]
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub(super) fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(state.as_str());
    }
}

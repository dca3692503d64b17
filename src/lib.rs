//! # Entity Mirror
//!
//! Local SQLite mirrors of remote REST entities, kept honest by hash-based
//! integrity checks against an authoritative server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MirrorEngine                            │
//! │  • One EntityCache per registered entity                   │
//! │  • Shared LocalStore, EventBus and MirrorConfig            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     EntityCache                             │
//! │  • Typed rows compiled from an EntityDescriptor            │
//! │  • CRUD over SQLite with lazy column migration             │
//! │  • Change events on every local write                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (periodic / post-write validation)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Integrity validator                         │
//! │  • Count check, then ID-range repair                       │
//! │  • Global hash, then per-block repair of differing rows    │
//! │  • Full refetch when the gap is too large                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        RemoteSource + IntegrityAuthority (HTTP / memory)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use entity_mirror::{ColumnDescriptor, EntityDescriptor, HttpRemote, MirrorConfig, MirrorEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let remote = Arc::new(HttpRemote::new("https://api.example.com").expect("client"));
//!     let config = MirrorConfig {
//!         db_path: Some("./mirror.db".into()),
//!         ..Default::default()
//!     };
//!     let engine = MirrorEngine::new(config, remote.clone(), remote);
//!
//!     let teams = engine
//!         .register(
//!             EntityDescriptor::new("teams", "/api/teams")
//!                 .column(ColumnDescriptor::integer("id").primary_key())
//!                 .column(ColumnDescriptor::text("name"))
//!                 .column(ColumnDescriptor::text("member_ids")),
//!         )
//!         .expect("valid descriptor");
//!
//!     engine.start().await.expect("store available");
//!     let report = teams.validate().await;
//!     println!("teams: {}", report.outcome);
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`MirrorEngine`] registry and lifecycle
//! - [`cache`]: Per-entity local cache and change events
//! - [`integrity`]: Validation protocol, repair and diagnostics
//! - [`merkle`]: Value encoding and block/global hashing
//! - [`schema`]: Entity descriptors, typed rows and transforms
//! - [`storage`]: SQLite local store and statement builder
//! - [`remote`]: Remote collaborator traits with HTTP and in-memory impls
//! - [`resilience`]: Retry with backoff

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod integrity;
pub mod merkle;
pub mod metrics;
pub mod remote;
pub mod resilience;
pub mod schema;
pub mod storage;

pub use cache::{CacheError, CacheEvent, EntityCache, EventBus, SubscriptionId};
pub use config::MirrorConfig;
pub use coordinator::{EngineState, MirrorEngine};
pub use integrity::{
    BlockDiagnosis, FieldDivergence, GlobalDiagnosis, RepairStats, RowDiagnosis, SkipReason,
    UnhealthyReason, ValidationOutcome, ValidationReport, ValidationStep, Verification,
};
pub use merkle::{BlockHash, GlobalHash, RowHash, TableHasher};
#[cfg(feature = "http")]
pub use remote::HttpRemote;
pub use remote::{
    FetchMode, IntegrityAuthority, IntegrityMode, ListParams, MemoryAuthority, Page, RemoteError,
    RemoteSource,
};
pub use resilience::retry::RetryConfig;
pub use schema::{
    ColumnDescriptor, ColumnType, EntityDescriptor, FieldKind, FieldTransform, FieldValue, Record,
    Row, SchemaError,
};
pub use storage::{LocalStore, StorageError, StoreMode};
pub use metrics::LatencyTimer;

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the mirror engine.
//!
//! # Example
//!
//! ```
//! use entity_mirror::MirrorConfig;
//!
//! // Minimal config (uses defaults, in-memory store)
//! let config = MirrorConfig::default();
//! assert_eq!(config.block_size, 1024);
//! assert_eq!(config.validation_interval_secs, 30);
//!
//! // Durable store, faster validation cycle
//! let config = MirrorConfig {
//!     db_path: Some("./mirror.db".into()),
//!     validation_interval_secs: 10,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Configuration for the mirror engine.
///
/// All fields have defaults. The large-mismatch thresholds are performance
/// heuristics, not correctness requirements.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// SQLite file for the durable store; `None` keeps everything in memory
    #[serde(default)]
    pub db_path: Option<String>,

    /// Rows per hash block (must match the authority)
    #[serde(default = "default_block_size")]
    pub block_size: i64,

    /// Periodic validation interval per entity
    #[serde(default = "default_validation_interval_secs")]
    pub validation_interval_secs: u64,

    /// Arm the periodic validation timer on first successful init
    #[serde(default = "default_true")]
    pub auto_validate: bool,

    /// Fire-and-forget validation after local upsert/delete/replace
    #[serde(default = "default_true")]
    pub validate_after_write: bool,

    /// Rows per multi-row INSERT
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,

    /// IDs per by-ID fetch request during repair
    #[serde(default = "default_fetch_chunk_size")]
    pub fetch_chunk_size: usize,

    /// Page size requested from the list endpoint
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Upper bound on list pages followed by one full fetch
    #[serde(default = "default_max_list_pages")]
    pub max_list_pages: usize,

    /// Relative count gap above which repair becomes a full refetch
    #[serde(default = "default_full_refetch_ratio")]
    pub full_refetch_ratio: f64,

    /// Absolute count gap above which repair becomes a full refetch
    #[serde(default = "default_full_refetch_rows")]
    pub full_refetch_rows: u64,
}

fn default_block_size() -> i64 { crate::merkle::DEFAULT_BLOCK_SIZE }
fn default_validation_interval_secs() -> u64 { 30 }
fn default_true() -> bool { true }
fn default_bulk_chunk_size() -> usize { 500 }
fn default_fetch_chunk_size() -> usize { 200 }
fn default_list_page_size() -> usize { 500 }
fn default_max_list_pages() -> usize { 10_000 }
fn default_full_refetch_ratio() -> f64 { 0.5 }
fn default_full_refetch_rows() -> u64 { 10_000 }

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            block_size: default_block_size(),
            validation_interval_secs: default_validation_interval_secs(),
            auto_validate: default_true(),
            validate_after_write: default_true(),
            bulk_chunk_size: default_bulk_chunk_size(),
            fetch_chunk_size: default_fetch_chunk_size(),
            list_page_size: default_list_page_size(),
            max_list_pages: default_max_list_pages(),
            full_refetch_ratio: default_full_refetch_ratio(),
            full_refetch_rows: default_full_refetch_rows(),
        }
    }
}

impl MirrorConfig {
    /// Defaults with every background trigger switched off.
    ///
    /// Validation then only runs when `validate()` is called explicitly.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            auto_validate: false,
            validate_after_write: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.validation_interval_secs.max(1))
    }

    /// Whether a count gap is large enough to wipe and rebootstrap.
    #[must_use]
    pub fn is_large_gap(&self, local: u64, authority: u64) -> bool {
        let gap = local.abs_diff(authority);
        if gap > self.full_refetch_rows {
            return true;
        }
        if authority == 0 {
            return gap > 0;
        }
        (gap as f64 / authority as f64) > self.full_refetch_ratio
    }
}

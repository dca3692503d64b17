// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hierarchical (row → block → global) hashing.
//!
//! ```text
//! global = H(block_0 || block_1 || ...)          ordered by block id
//!   block_k = H(row_a || row_b || ...)           ordered by row id, a,b ∈ [k·B, (k+1)·B)
//!     row_a = H(row_expression(a))
//! ```
//!
//! `H` is SHA-256 rendered as lowercase hex, and concatenation is over the hex
//! strings, matching the authority. Everything here is a pure function of its
//! input; callers read rows from the local store and hand them in.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use super::expression::row_expression;
use crate::schema::{Row, Schema};

/// Rows per block.
pub const DEFAULT_BLOCK_SIZE: i64 = 1024;

/// Hash of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowHash {
    pub row_id: i64,
    pub row_hash: String,
}

/// Summary of one non-empty block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHash {
    pub block_id: i64,
    pub block_hash: String,
    pub row_count: u64,
    pub min_id: i64,
    pub max_id: i64,
}

/// Whole-table hash paired with its row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalHash {
    pub global_hash: String,
    pub row_count: u64,
}

/// SHA-256 of a string, lowercase hex.
#[must_use]
pub fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Computes row, block and global hashes for one block size.
#[derive(Debug, Clone, Copy)]
pub struct TableHasher {
    block_size: i64,
}

impl Default for TableHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl TableHasher {
    /// Create a hasher; non-positive block sizes fall back to the default.
    #[must_use]
    pub fn new(block_size: i64) -> Self {
        let block_size = if block_size > 0 { block_size } else { DEFAULT_BLOCK_SIZE };
        Self { block_size }
    }

    #[must_use]
    pub fn block_size(&self) -> i64 {
        self.block_size
    }

    /// `floor(id / B)`, also for negative ids.
    #[inline]
    #[must_use]
    pub fn block_id(&self, id: i64) -> i64 {
        id.div_euclid(self.block_size)
    }

    /// Inclusive id range covered by a block.
    #[must_use]
    pub fn block_range(&self, block_id: i64) -> (i64, i64) {
        let start = block_id.saturating_mul(self.block_size);
        (start, start.saturating_add(self.block_size - 1))
    }

    /// Hash of a single row.
    #[must_use]
    pub fn row_hash(&self, schema: &Schema, row: &Row) -> RowHash {
        RowHash {
            row_id: row.id,
            row_hash: digest(&row_expression(schema, row)),
        }
    }

    /// Row hashes sorted by ascending id.
    #[must_use]
    pub fn row_hashes(&self, schema: &Schema, rows: &[Row]) -> Vec<RowHash> {
        let mut hashes: Vec<RowHash> = rows.iter().map(|r| self.row_hash(schema, r)).collect();
        hashes.sort_by_key(|h| h.row_id);
        hashes
    }

    /// Group row hashes into non-empty blocks, ordered by block id.
    ///
    /// Input order does not matter.
    #[must_use]
    pub fn blocks(&self, row_hashes: &[RowHash]) -> Vec<BlockHash> {
        let mut sorted: Vec<&RowHash> = row_hashes.iter().collect();
        sorted.sort_by_key(|h| h.row_id);

        let mut blocks = Vec::new();
        let mut current: Option<(i64, Sha256, u64, i64, i64)> = None;

        for row in sorted {
            let block_id = self.block_id(row.row_id);
            let same_block = matches!(current, Some((id, ..)) if id == block_id);
            if same_block {
                if let Some((_, hasher, count, _, max_id)) = current.as_mut() {
                    hasher.update(row.row_hash.as_bytes());
                    *count += 1;
                    *max_id = row.row_id;
                }
                continue;
            }
            if let Some(done) = current.take() {
                blocks.push(Self::finish_block(done));
            }
            let mut hasher = Sha256::new();
            hasher.update(row.row_hash.as_bytes());
            current = Some((block_id, hasher, 1, row.row_id, row.row_id));
        }
        if let Some(done) = current {
            blocks.push(Self::finish_block(done));
        }
        blocks
    }

    fn finish_block((block_id, hasher, row_count, min_id, max_id): (i64, Sha256, u64, i64, i64)) -> BlockHash {
        BlockHash {
            block_id,
            block_hash: hex::encode(hasher.finalize()),
            row_count,
            min_id,
            max_id,
        }
    }

    /// Global hash over block hashes (sorted by block id first).
    #[must_use]
    pub fn global(&self, blocks: &[BlockHash]) -> GlobalHash {
        let mut sorted: Vec<&BlockHash> = blocks.iter().collect();
        sorted.sort_by_key(|b| b.block_id);

        let mut hasher = Sha256::new();
        let mut row_count = 0;
        for block in sorted {
            hasher.update(block.block_hash.as_bytes());
            row_count += block.row_count;
        }
        GlobalHash {
            global_hash: hex::encode(hasher.finalize()),
            row_count,
        }
    }

    /// Full-table hash straight from rows.
    #[instrument(skip(self, schema, rows), fields(table = %schema.table_name(), rows = rows.len()))]
    pub fn table_hash(&self, schema: &Schema, rows: &[Row]) -> GlobalHash {
        self.global(&self.blocks(&self.row_hashes(schema, rows)))
    }
}

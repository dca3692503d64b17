// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Side-by-side hash comparison for debugging drift.
//!
//! These calls never repair anything. They put the local expression and hash
//! next to the authority's debug output so an encoding disagreement can be
//! pinned to a single field.

use super::repair::mismatched_blocks;
use crate::cache::{CacheError, EntityCache};
use crate::merkle::{encoded_fields, GlobalHash, FIELD_DELIMITER};
use crate::storage::StorageError;

/// One hash field whose encoded value differs between both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDivergence {
    pub field: String,
    pub local: String,
    pub authority: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDiagnosis {
    pub row_id: i64,
    /// `None` when the row is not stored locally
    pub local_expression: Option<String>,
    pub local_hash: Option<String>,
    pub authority_expression: Option<String>,
    pub authority_hash: Option<String>,
    /// Empty unless both expressions are known and differ
    pub divergence: Vec<FieldDivergence>,
}

impl RowDiagnosis {
    #[must_use]
    pub fn matches(&self) -> bool {
        self.local_hash.is_some() && self.local_hash == self.authority_hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDiagnosis {
    pub block_id: i64,
    pub local_hash: Option<String>,
    pub authority_hash: Option<String>,
    pub local_rows: usize,
    /// Rows inside the block whose hashes differ or exist on one side only
    pub mismatched_rows: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDiagnosis {
    pub local: GlobalHash,
    pub authority_hash: Option<String>,
    pub mismatched_blocks: Vec<i64>,
}

impl EntityCache {
    /// Compare one row's expression and hash with the authority's.
    pub async fn diagnose_row(&self, id: i64) -> Result<RowDiagnosis, CacheError> {
        self.require_store().await?;
        let local = self.load_rows_in_range(id, id).await?.into_iter().next();
        let remote = self
            .authority
            .debug_row(self.schema.authority_table(), id)
            .await?;

        let local_fields = local.as_ref().map(|row| encoded_fields(&self.schema, row));
        let local_expression = local_fields.as_ref().map(|f| f.join(FIELD_DELIMITER));
        let local_hash = local
            .as_ref()
            .map(|row| self.hasher.row_hash(&self.schema, row).row_hash);
        let divergence = match (&local_fields, &local_expression, &remote.expression) {
            (Some(fields), Some(l), Some(r)) if l != r => self.field_divergence(fields, r),
            _ => Vec::new(),
        };

        Ok(RowDiagnosis {
            row_id: id,
            local_expression,
            local_hash,
            authority_expression: remote.expression,
            authority_hash: remote.hash,
            divergence,
        })
    }

    pub async fn diagnose_block(&self, block_id: i64) -> Result<BlockDiagnosis, CacheError> {
        self.require_store().await?;
        let authority_table = self.schema.authority_table();
        let (start, end) = self.hasher.block_range(block_id);
        let rows = self.load_rows_in_range(start, end).await?;
        let local_hashes = self.hasher.row_hashes(&self.schema, &rows);
        let local_hash = self.hasher.blocks(&local_hashes).pop().map(|b| b.block_hash);

        let remote = self.authority.debug_block(authority_table, block_id).await?;
        let remote_rows = self.authority.block_rows(authority_table, block_id).await?;
        let local_refs: Vec<_> = local_hashes.iter().collect();
        let (mut mismatched_rows, deleted) = super::repair::diff_rows(&local_refs, &remote_rows);
        mismatched_rows.extend(deleted);
        mismatched_rows.sort_unstable();

        Ok(BlockDiagnosis {
            block_id,
            local_hash,
            authority_hash: remote.hash,
            local_rows: rows.len(),
            mismatched_rows,
        })
    }

    pub async fn diagnose_global(&self) -> Result<GlobalDiagnosis, CacheError> {
        self.require_store().await?;
        let authority_table = self.schema.authority_table();
        let rows = self.load_rows().await?;
        let local_blocks = self
            .hasher
            .blocks(&self.hasher.row_hashes(&self.schema, &rows));
        let local = self.hasher.global(&local_blocks);

        let remote = self.authority.debug_global(authority_table).await?;
        let remote_blocks = self.authority.blocks(authority_table).await?;

        Ok(GlobalDiagnosis {
            local,
            authority_hash: remote.hash,
            mismatched_blocks: mismatched_blocks(&local_blocks, &remote_blocks),
        })
    }

    async fn require_store(&self) -> Result<(), CacheError> {
        if self.ready().await {
            Ok(())
        } else {
            Err(StorageError::Unavailable(format!("local store not ready for '{}'", self.table_name())).into())
        }
    }

    /// Pair local field encodings with the authority's joined expression.
    fn field_divergence(&self, local: &[String], authority: &str) -> Vec<FieldDivergence> {
        align_fields(local, authority)
            .into_iter()
            .zip(self.schema.hash_fields())
            .zip(local)
            .filter_map(|((theirs, field), mine)| {
                (mine.as_str() != theirs).then(|| FieldDivergence {
                    field: field.name.clone(),
                    local: mine.clone(),
                    authority: theirs.to_string(),
                })
            })
            .collect()
    }
}

/// Split `authority` into one slice per local field.
///
/// Values may themselves contain the delimiter, so fields are peeled off
/// from both ends wherever they agree with the local encoding; only the
/// disagreeing middle is split on the delimiter, its last field taking the
/// remainder.
fn align_fields<'a>(local: &[String], authority: &'a str) -> Vec<&'a str> {
    let n = local.len();
    let delim = FIELD_DELIMITER;
    let mut aligned = vec![""; n];

    let (mut lo, mut start) = (0, 0);
    while lo < n {
        let rest = &authority[start..];
        let mine = local[lo].as_str();
        if lo + 1 == n {
            if rest != mine {
                break;
            }
            aligned[lo] = rest;
            start = authority.len();
        } else if rest.starts_with(mine) && rest[mine.len()..].starts_with(delim) {
            aligned[lo] = &rest[..mine.len()];
            start += mine.len() + delim.len();
        } else {
            break;
        }
        lo += 1;
    }

    let (mut hi, mut end) = (n, authority.len());
    while hi > lo + 1 {
        let head = &authority[start..end];
        let mine = local[hi - 1].as_str();
        let Some(before) = head.strip_suffix(mine) else {
            break;
        };
        if !before.ends_with(delim) {
            break;
        }
        aligned[hi - 1] = &head[before.len()..];
        end -= mine.len() + delim.len();
        hi -= 1;
    }

    if lo < hi {
        for (slot, piece) in aligned[lo..hi]
            .iter_mut()
            .zip(authority[start..end].splitn(hi - lo, delim))
        {
            *slot = piece;
        }
    }
    aligned
}

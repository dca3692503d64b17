// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Repair phases.
//!
//! - **ID-range repair** fixes row-set drift (missing or extra rows) when
//!   counts differ.
//! - **Block repair** fixes content drift, touching only blocks whose hash or
//!   row count disagrees and, inside them, only rows whose hash disagrees.
//! - **Full refetch** is the fallback for both: wipe and rebootstrap.
//!
//! Partial failures (one block's row hashes, one fetch or delete chunk) are
//! logged and skipped; the recheck at the end of the pass decides the outcome.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

use super::types::{ValidationReport, ValidationStep};
use super::PassError;
use crate::cache::{CacheEvent, EntityCache};
use crate::merkle::{BlockHash, RowHash};
use crate::remote::{IdRange, ListParams};
use crate::schema::{Record, Row};

/// Outcome of fetching a set of IDs from the remote.
#[derive(Debug, Default, Clone, Copy)]
struct FetchSummary {
    written: usize,
    chunks: usize,
    failed_chunks: usize,
}

impl FetchSummary {
    fn all_failed(&self) -> bool {
        self.chunks > 0 && self.failed_chunks == self.chunks
    }
}

impl EntityCache {
    /// Wipe local contents and reload every page from the list endpoint.
    pub(crate) async fn full_refetch(&self, report: &mut ValidationReport, reason: &str) -> Result<(), PassError> {
        let table = self.schema.table_name();
        report.step(ValidationStep::FullRefetch);
        warn!(table, reason, "Full refetch");
        crate::metrics::record_full_refetch(table, reason);

        let records = self
            .list_all(ListParams::first_page(self.config.list_page_size))
            .await?;
        let rows = self.rows_from_records(&records);
        let written = self.replace_rows(&rows).await?;

        report.stats.full_refetches += 1;
        report.stats.rows_fetched += written;
        crate::metrics::record_repair(table, "fetched", written);
        Ok(())
    }

    /// Reconcile the local ID set with the authority's.
    pub(crate) async fn repair_id_ranges(&self, report: &mut ValidationReport) -> Result<(), PassError> {
        let table = self.schema.table_name();

        let (remote_ids, listed) = match self.authority.id_ranges(self.schema.authority_table()).await {
            Ok(ranges) => (expand_ranges(&ranges), None),
            Err(e) if e.is_client_error() => {
                debug!(table, error = %e, "ID ranges unsupported, reconstructing from list");
                let records = self
                    .list_all(ListParams::first_page(self.config.list_page_size))
                    .await?;
                let rows = self.rows_from_records(&records);
                let ids: BTreeSet<i64> = rows.iter().map(|r| r.id).collect();
                (ids, Some(rows))
            }
            Err(e) => return Err(e.into()),
        };

        let local_ids: BTreeSet<i64> = self.local_ids().await?.into_iter().collect();
        let stale: Vec<i64> = local_ids.difference(&remote_ids).copied().collect();
        let missing: Vec<i64> = remote_ids.difference(&local_ids).copied().collect();
        info!(table, stale = stale.len(), missing = missing.len(), "ID-range diff");

        self.delete_stale(&stale, report).await;
        if missing.is_empty() {
            return Ok(());
        }

        // Pagination already delivered the rows.
        if let Some(rows) = listed {
            let wanted: HashSet<i64> = missing.iter().copied().collect();
            let rows: Vec<Row> = rows.into_iter().filter(|r| wanted.contains(&r.id)).collect();
            self.store_rows(&rows, report).await;
            return Ok(());
        }

        let summary = self.fetch_ids(&missing, report).await;
        if summary.all_failed() {
            self.full_refetch(report, "fetch_failed").await?;
        }
        Ok(())
    }

    /// Refetch rows of mismatched blocks and drop rows the authority lacks.
    pub(crate) async fn repair_blocks(&self, report: &mut ValidationReport) -> Result<(), PassError> {
        let table = self.schema.table_name();
        let authority_table = self.schema.authority_table();

        let remote_blocks = self.authority.blocks(authority_table).await?;
        let local_rows = self.load_rows().await?;
        let local_hashes = self.hasher.row_hashes(&self.schema, &local_rows);
        let local_blocks = self.hasher.blocks(&local_hashes);

        let mismatched = mismatched_blocks(&local_blocks, &remote_blocks);
        crate::metrics::record_block_mismatches(table, mismatched.len());
        info!(table, blocks = mismatched.len(), "Repairing mismatched blocks");

        let listed: HashSet<i64> = remote_blocks.iter().map(|b| b.block_id).collect();
        for block_id in mismatched {
            // Absent from the authority's list: every local row in it is stale
            let remote_rows = if listed.contains(&block_id) {
                match self.authority.block_rows(authority_table, block_id).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!(table, block_id, error = %e, "Block row hashes unavailable, skipping block");
                        crate::metrics::record_remote_error("integrity_block_rows", e.class());
                        continue;
                    }
                }
            } else {
                Vec::new()
            };

            let (start, end) = self.hasher.block_range(block_id);
            let local_block: Vec<&RowHash> = local_hashes
                .iter()
                .filter(|h| h.row_id >= start && h.row_id <= end)
                .collect();
            let (to_fetch, to_delete) = diff_rows(&local_block, &remote_rows);
            debug!(table, block_id, fetch = to_fetch.len(), delete = to_delete.len(), "Block diff");

            self.delete_stale(&to_delete, report).await;

            if !to_fetch.is_empty() {
                let summary = self.fetch_ids(&to_fetch, report).await;
                if summary.written == 0 {
                    warn!(table, block_id, rows = to_fetch.len(), "Refetch returned nothing for rows the authority lists");
                    self.full_refetch(report, "empty_refetch").await?;
                    return Ok(());
                }
            }
            report.stats.blocks_repaired += 1;
        }
        Ok(())
    }

    /// One batch call if supported, otherwise chunked by-ID calls.
    async fn fetch_ids(&self, ids: &[i64], report: &mut ValidationReport) -> FetchSummary {
        let table = self.schema.table_name();
        let endpoint = self.schema.endpoint();
        let mut summary = FetchSummary::default();

        match self.remote.batch_fetch(endpoint, ids).await {
            Ok(records) => {
                summary.chunks = 1;
                summary.written = self.store_records(records, report).await;
                return summary;
            }
            Err(e) if e.is_client_error() => {
                debug!(table, "Batch fetch unsupported, using chunked fetch");
            }
            Err(e) => {
                warn!(table, error = %e, "Batch fetch failed, using chunked fetch");
                crate::metrics::record_remote_error("batch_fetch", e.class());
            }
        }

        for chunk in ids.chunks(self.config.fetch_chunk_size.max(1)) {
            summary.chunks += 1;
            match self.remote.fetch_by_ids(endpoint, chunk).await {
                Ok(records) => summary.written += self.store_records(records, report).await,
                Err(e) => {
                    warn!(table, ids = chunk.len(), error = %e, "Skipping failed fetch chunk");
                    crate::metrics::record_chunk_failure(table, "fetch");
                    crate::metrics::record_remote_error("fetch_by_ids", e.class());
                    summary.failed_chunks += 1;
                }
            }
        }
        summary
    }

    async fn store_records(&self, records: Vec<Record>, report: &mut ValidationReport) -> usize {
        let rows = self.rows_from_records(&records);
        self.store_rows(&rows, report).await
    }

    async fn store_rows(&self, rows: &[Row], report: &mut ValidationReport) -> usize {
        if rows.is_empty() {
            return 0;
        }
        let (ids, _) = self.write_rows(rows, self.config.bulk_chunk_size).await;
        let written = ids.len();
        report.stats.rows_fetched += written;
        crate::metrics::record_repair(self.schema.table_name(), "fetched", written);
        if written > 0 {
            self.events.emit(CacheEvent::BulkUpdated {
                table: self.schema.table_name().to_string(),
                ids,
            });
        }
        written
    }

    async fn delete_stale(&self, ids: &[i64], report: &mut ValidationReport) {
        if ids.is_empty() {
            return;
        }
        let deleted = self.delete_ids(ids).await;
        report.stats.rows_deleted += deleted;
        crate::metrics::record_repair(self.schema.table_name(), "deleted", deleted);
        if deleted > 0 {
            self.events.emit(CacheEvent::BulkUpdated {
                table: self.schema.table_name().to_string(),
                ids: ids.to_vec(),
            });
        }
    }
}

fn expand_ranges(ranges: &[IdRange]) -> BTreeSet<i64> {
    ranges
        .iter()
        .filter(|r| r.start <= r.end)
        .flat_map(|r| r.start..=r.end)
        .collect()
}

/// Block ids present on only one side, or with differing hash or row count.
pub(crate) fn mismatched_blocks(local: &[BlockHash], remote: &[BlockHash]) -> Vec<i64> {
    let local: BTreeMap<i64, &BlockHash> = local.iter().map(|b| (b.block_id, b)).collect();
    let remote: BTreeMap<i64, &BlockHash> = remote.iter().map(|b| (b.block_id, b)).collect();

    let ids: BTreeSet<i64> = local.keys().chain(remote.keys()).copied().collect();
    ids.into_iter()
        .filter(|id| match (local.get(id), remote.get(id)) {
            (Some(l), Some(r)) => l.block_hash != r.block_hash || l.row_count != r.row_count,
            _ => true,
        })
        .collect()
}

/// `(to_fetch, to_delete)` for one block.
pub(crate) fn diff_rows(local: &[&RowHash], remote: &[RowHash]) -> (Vec<i64>, Vec<i64>) {
    let local: HashMap<i64, &str> = local.iter().map(|h| (h.row_id, h.row_hash.as_str())).collect();
    let remote_ids: HashSet<i64> = remote.iter().map(|h| h.row_id).collect();

    let mut to_fetch: Vec<i64> = remote
        .iter()
        .filter(|h| local.get(&h.row_id) != Some(&h.row_hash.as_str()))
        .map(|h| h.row_id)
        .collect();
    let mut to_delete: Vec<i64> = local
        .keys()
        .filter(|id| !remote_ids.contains(id))
        .copied()
        .collect();
    to_fetch.sort_unstable();
    to_delete.sort_unstable();
    (to_fetch, to_delete)
}

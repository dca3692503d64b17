// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};

use super::types::{
    SkipReason, UnhealthyReason, ValidationOutcome, ValidationReport, ValidationStep, Verification,
};
use super::PassError;
use crate::cache::EntityCache;
use crate::merkle::GlobalHash;
use crate::metrics::LatencyTimer;
use crate::remote::ListParams;
use crate::storage::StorageError;

/// Clears the reentrancy flag when a pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EntityCache {
    /// Run one validation pass.
    ///
    /// Never fails: every problem resolves to an outcome in the report and
    /// local data is kept for the next cycle.
    #[instrument(skip(self), fields(table = %self.schema.table_name()))]
    pub async fn validate(&self) -> ValidationReport {
        let table = self.schema.table_name();
        let mut report = ValidationReport::new(table);

        if self
            .validating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(table, "Validation already running, skipping trigger");
            crate::metrics::record_validation(table, "skipped");
            return report;
        }
        let _guard = RunGuard(&self.validating);
        let _timer = LatencyTimer::new(table);

        report.outcome = if self.ready().await {
            match self.run_pass(&mut report).await {
                Ok(outcome) => outcome,
                Err(e) => e.into_outcome(),
            }
        } else {
            ValidationOutcome::Skipped(SkipReason::StoreUnavailable)
        };

        match report.outcome {
            ValidationOutcome::Healthy => info!(
                table,
                verification = ?report.verification,
                fetched = report.stats.rows_fetched,
                deleted = report.stats.rows_deleted,
                "Validation healthy"
            ),
            ValidationOutcome::Unhealthy(ref reason) => warn!(table, %reason, "Validation unhealthy"),
            ValidationOutcome::Skipped(reason) => debug!(table, %reason, "Validation skipped"),
        }
        crate::metrics::record_validation(table, report.outcome.as_str());
        report
    }

    async fn run_pass(&self, report: &mut ValidationReport) -> Result<ValidationOutcome, PassError> {
        let table = self.schema.table_name();
        let authority_table = self.schema.authority_table();

        // 1. Authority state
        report.step(ValidationStep::FetchAuthority);
        let authority = match self.authority.global(authority_table).await {
            Ok(global) => global,
            Err(e) if e.is_client_error() => {
                info!(table, error = %e, "Integrity endpoints unsupported, ensuring population only");
                return self.ensure_populated(report).await;
            }
            Err(e) => {
                crate::metrics::record_remote_error("integrity_global", e.class());
                return Ok(ValidationOutcome::Unhealthy(UnhealthyReason::AuthorityUnreachable(
                    e.to_string(),
                )));
            }
        };
        let Some(authority_hash) = authority.global_hash else {
            info!(table, "Authority reports no hash, ensuring population only");
            return self.ensure_populated(report).await;
        };

        // 2. Counts first; never hash a table we know is incomplete
        report.step(ValidationStep::CountCheck);
        let local_count = self.local_count().await?;
        crate::metrics::set_local_rows(table, local_count);
        if local_count != authority.row_count {
            info!(table, local = local_count, authority = authority.row_count, "Row count mismatch");
            if self.config.is_large_gap(local_count, authority.row_count) {
                self.full_refetch(report, "large_gap").await?;
            } else {
                report.step(ValidationStep::IdRangeRepair);
                self.repair_id_ranges(report).await?;
            }

            let recount = self.local_count().await?;
            crate::metrics::set_local_rows(table, recount);
            if recount != authority.row_count {
                return Ok(ValidationOutcome::Unhealthy(UnhealthyReason::CountMismatch {
                    local: recount,
                    authority: authority.row_count,
                }));
            }
        }

        // 3. Global hash
        report.step(ValidationStep::GlobalHashCheck);
        report.verification = Verification::Hashes;
        let local = self.local_global_hash().await?;
        if local.global_hash == authority_hash {
            return Ok(ValidationOutcome::Healthy);
        }

        // 4. Targeted block repair
        report.step(ValidationStep::BlockRepair);
        self.repair_blocks(report).await?;

        report.step(ValidationStep::GlobalRecheck);
        let local = self.local_global_hash().await?;
        if local.global_hash == authority_hash {
            Ok(ValidationOutcome::Healthy)
        } else {
            Ok(ValidationOutcome::Unhealthy(UnhealthyReason::HashMismatch {
                local: local.global_hash,
                authority: authority_hash,
            }))
        }
    }

    /// Fetch everything if the local table is empty. Healthy unless the
    /// fetch itself fails.
    async fn ensure_populated(&self, report: &mut ValidationReport) -> Result<ValidationOutcome, PassError> {
        report.step(ValidationStep::EnsurePopulated);
        report.verification = Verification::PopulationOnly;

        if self.local_count().await? == 0 {
            let records = self
                .list_all(ListParams::first_page(self.config.list_page_size))
                .await?;
            let rows = self.rows_from_records(&records);
            let written = self.replace_rows(&rows).await?;
            report.stats.rows_fetched += written;
            crate::metrics::record_repair(self.schema.table_name(), "fetched", written);
            info!(table = %self.schema.table_name(), rows = written, "Populated empty table");
        }
        Ok(ValidationOutcome::Healthy)
    }

    /// Global hash of the current local contents.
    pub(crate) async fn local_global_hash(&self) -> Result<GlobalHash, StorageError> {
        let rows = self.load_rows().await?;
        Ok(self.hasher.table_hash(&self.schema, &rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EventBus;
    use crate::config::MirrorConfig;
    use crate::remote::{IntegrityMode, MemoryAuthority};
    use crate::schema::{ColumnDescriptor, EntityDescriptor};
    use crate::storage::LocalStore;
    use serde_json::json;
    use std::sync::Arc;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("notes", "/api/notes")
            .column(ColumnDescriptor::integer("id").primary_key())
            .column(ColumnDescriptor::text("body"))
    }

    fn setup() -> (Arc<MemoryAuthority>, Arc<EntityCache>) {
        let authority = Arc::new(MemoryAuthority::new());
        authority.register(descriptor()).unwrap();
        let cache = EntityCache::new(
            descriptor(),
            Arc::new(LocalStore::in_memory()),
            authority.clone(),
            authority.clone(),
            Arc::new(MirrorConfig::manual()),
            Arc::new(EventBus::new()),
        )
        .unwrap();
        (authority, cache)
    }

    #[tokio::test]
    async fn test_empty_tables_are_healthy() {
        let (_authority, cache) = setup();
        let report = cache.validate().await;
        assert!(report.is_healthy());
        assert_eq!(report.verification, Verification::Hashes);
        assert!(report.stats.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_keeps_local_data() {
        let (authority, cache) = setup();
        authority.insert("notes", json!({"id": 1, "body": "a"})).unwrap();
        cache.validate().await;
        authority.set_integrity_mode(IntegrityMode::ServerError);

        let report = cache.validate().await;
        assert!(matches!(
            report.outcome,
            ValidationOutcome::Unhealthy(UnhealthyReason::AuthorityUnreachable(_))
        ));
        assert_eq!(cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_hash_populates_empty_table() {
        let (authority, cache) = setup();
        authority
            .insert_many("notes", (1..=3).map(|i| json!({"id": i, "body": "x"})))
            .unwrap();
        authority.set_integrity_mode(IntegrityMode::NoHash);

        let report = cache.validate().await;
        assert!(report.is_healthy());
        assert_eq!(report.verification, Verification::PopulationOnly);
        assert_eq!(report.stats.rows_fetched, 3);
        assert!(!report.ran(ValidationStep::GlobalHashCheck));
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_skipped() {
        let (_authority, cache) = setup();
        cache.validating.store(true, Ordering::SeqCst);
        let report = cache.validate().await;
        assert_eq!(report.outcome, ValidationOutcome::Skipped(SkipReason::AlreadyRunning));
        assert!(report.steps.is_empty());

        cache.validating.store(false, Ordering::SeqCst);
        assert!(cache.validate().await.is_healthy());
        assert!(!cache.is_validating(), "guard released after the pass");
    }

    #[tokio::test]
    async fn test_large_gap_triggers_full_refetch() {
        let (authority, cache) = setup();
        authority
            .insert_many("notes", (1..=20).map(|i| json!({"id": i, "body": "x"})))
            .unwrap();

        let report = cache.validate().await;
        assert!(report.is_healthy());
        assert!(report.ran(ValidationStep::FullRefetch));
        assert!(!report.ran(ValidationStep::IdRangeRepair));
        assert_eq!(report.stats.full_refetches, 1);
        assert_eq!(cache.count().await.unwrap(), 20);
    }
}

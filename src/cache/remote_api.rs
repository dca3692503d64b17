// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote pass-through.
//!
//! `fetch_all()` is the bootstrap path: it pages through the list endpoint
//! and only touches local data once every page arrived. The CRUD calls are
//! thin wrappers that hand the server's canonical record back to the caller,
//! who decides whether to `upsert()` it locally.

use tracing::{info, instrument, warn};

use super::{CacheError, EntityCache};
use crate::remote::{ListParams, RemoteError};
use crate::schema::Record;

impl EntityCache {
    /// Download every page and atomically replace local contents.
    ///
    /// On any remote error the local table is left untouched.
    #[instrument(skip(self, params), fields(table = %self.schema.table_name()))]
    pub async fn fetch_all(&self, params: ListParams) -> Result<usize, CacheError> {
        let records = self.list_all(params).await?;
        if !self.ready().await {
            return Ok(0);
        }
        let rows = self.rows_from_records(&records);
        let result = self.replace_rows(&rows).await;
        let count = self.settle("fetch_all", result, 0)?;
        info!(table = %self.schema.table_name(), rows = count, "Fetched all rows from remote");
        Ok(count)
    }

    /// Create on the server; returns the canonical record (with its id).
    pub async fn create_remote(&self, record: &Record) -> Result<Record, CacheError> {
        self.remote
            .create(self.schema.endpoint(), record)
            .await
            .map_err(|e| self.remote_failure("create", e))
    }

    pub async fn update_remote(&self, id: i64, record: &Record) -> Result<Record, CacheError> {
        self.remote
            .update(self.schema.endpoint(), id, record)
            .await
            .map_err(|e| self.remote_failure("update", e))
    }

    pub async fn delete_remote(&self, id: i64) -> Result<(), CacheError> {
        self.remote
            .delete(self.schema.endpoint(), id)
            .await
            .map_err(|e| self.remote_failure("delete", e))
    }

    /// Follow pagination until the remote reports no further page.
    ///
    /// A listing still open after `max_list_pages` is an error: callers
    /// replace the whole table with the result, so it must be complete.
    pub(crate) async fn list_all(&self, params: ListParams) -> Result<Vec<Record>, RemoteError> {
        let mut params = ListParams {
            page: params.page.max(1),
            page_size: if params.page_size == 0 {
                self.config.list_page_size
            } else {
                params.page_size
            },
            ..params
        };

        let mut records = Vec::new();
        for _ in 0..self.config.max_list_pages.max(1) {
            let page = self.remote.list(self.schema.endpoint(), &params).await?;
            let empty = page.items.is_empty();
            records.extend(page.items);
            if !page.has_more || empty {
                return Ok(records);
            }
            params = params.next_page();
        }

        let pages = self.config.max_list_pages.max(1);
        warn!(
            table = %self.schema.table_name(),
            pages,
            rows = records.len(),
            "List pagination limit reached, discarding partial listing"
        );
        crate::metrics::record_remote_error("list", "truncated");
        Err(RemoteError::Truncated { pages })
    }

    fn remote_failure(&self, operation: &str, err: RemoteError) -> CacheError {
        warn!(table = %self.schema.table_name(), operation, error = %err, "Remote call failed");
        crate::metrics::record_remote_error(operation, err.class());
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::MirrorConfig;
    use crate::remote::{ListParams, MemoryAuthority};
    use crate::schema::{ColumnDescriptor, Record};
    use crate::storage::LocalStore;
    use serde_json::{json, Value};

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("tasks", "/api/tasks")
            .column(ColumnDescriptor::integer("id").primary_key())
            .column(ColumnDescriptor::text("title"))
    }

    fn setup(config: MirrorConfig) -> (Arc<MemoryAuthority>, Arc<EntityCache>) {
        let authority = Arc::new(MemoryAuthority::new());
        authority.register(descriptor()).unwrap();
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

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_fetch_all_follows_pages() {
        let (authority, cache) = setup(MirrorConfig {
            list_page_size: 3,
            ..MirrorConfig::manual()
        });
        authority
            .insert_many("tasks", (1..=10).map(|i| json!({"id": i, "title": format!("t{}", i)})))
            .unwrap();

        let fetched = cache.fetch_all(ListParams::default()).await.unwrap();
        assert_eq!(fetched, 10);
        assert_eq!(authority.list_calls(), 4);
        assert_eq!(cache.count().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_fetch_all_error_keeps_local_data() {
        let (authority, cache) = setup(MirrorConfig::manual());
        cache.upsert(record(json!({"id": 1, "title": "local"}))).await.unwrap();
        authority.set_list_failing(true);

        let err = cache.fetch_all(ListParams::default()).await.unwrap_err();
        assert!(matches!(err, CacheError::Remote(RemoteError::Server { .. })));
        assert_eq!(cache.ids().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_page_limit_leaves_local_rows_alone() {
        let (authority, cache) = setup(MirrorConfig {
            list_page_size: 1,
            max_list_pages: 2,
            ..MirrorConfig::manual()
        });
        let rows = (1..=5).map(|i| json!({"id": i, "title": format!("t{}", i)}));
        authority.insert_many("tasks", rows.clone()).unwrap();
        cache.bulk_upsert(rows.map(record).collect()).await.unwrap();

        let err = cache.fetch_all(ListParams::default()).await.unwrap_err();
        assert!(matches!(err, CacheError::Remote(RemoteError::Truncated { pages: 2 })));
        assert_eq!(authority.list_calls(), 2);
        assert_eq!(cache.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_truncated_listing_never_replaces_table() {
        let (authority, cache) = setup(MirrorConfig {
            list_page_size: 1,
            max_list_pages: 2,
            ..MirrorConfig::manual()
        });
        let rows = (1..=5).map(|i| json!({"id": i, "title": format!("t{}", i)}));
        authority.insert_many("tasks", rows.clone()).unwrap();
        cache.bulk_upsert(rows.map(record).take(2).collect()).await.unwrap();

        // Large gap: the pass wants a full refetch but the listing is cut short
        let report = cache.validate().await;
        assert!(matches!(
            report.outcome,
            crate::integrity::ValidationOutcome::Unhealthy(
                crate::integrity::UnhealthyReason::AuthorityUnreachable(_)
            )
        ));
        assert_eq!(cache.ids().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_remote_crud_round_trip() {
        let (authority, cache) = setup(MirrorConfig::manual());

        let created = cache
            .create_remote(&record(json!({"title": "new"})))
            .await
            .unwrap();
        let id = created.get("id").and_then(Value::as_i64).unwrap();
        assert!(cache.upsert(created).await.unwrap());

        let updated = cache
            .update_remote(id, &record(json!({"title": "renamed"})))
            .await
            .unwrap();
        assert_eq!(updated.get("title"), Some(&json!("renamed")));

        cache.delete_remote(id).await.unwrap();
        assert_eq!(authority.count("tasks"), 0);
        assert!(matches!(
            cache.delete_remote(id).await.unwrap_err(),
            CacheError::Remote(RemoteError::Client { status: 404, .. })
        ));
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change events.
//!
//! Every local mutation (host write or repair) is announced on the engine's
//! [`EventBus`] so views can refresh. Handlers run synchronously on the
//! emitting task, after the write committed; keep them short.
//!
//! | Event | Fired by |
//! |---|---|
//! | `Created` / `Updated` | `upsert` (decided by a presence check) |
//! | `Deleted` | `remove` |
//! | `BulkUpdated` | `bulk_upsert`, repair fetches |
//! | `Replaced` | `replace_all`, `fetch_all`, full refetch |

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::schema::Record;

/// A committed local change.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Created { table: String, id: i64, record: Record },
    Updated { table: String, id: i64, record: Record },
    Deleted { table: String, id: i64 },
    BulkUpdated { table: String, ids: Vec<i64> },
    Replaced { table: String, count: usize },
}

impl CacheEvent {
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Created { table, .. }
            | Self::Updated { table, .. }
            | Self::Deleted { table, .. }
            | Self::BulkUpdated { table, .. }
            | Self::Replaced { table, .. } => table,
        }
    }

    /// Label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
            Self::BulkUpdated { .. } => "bulk_updated",
            Self::Replaced { .. } => "replaced",
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Typed publish/subscribe for [`CacheEvent`]s.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn emit(&self, event: CacheEvent) {
        crate::metrics::record_event(event.kind());
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<Handler> = self.handlers.read().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(&event);
        }
    }
}

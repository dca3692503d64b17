// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle: start and shutdown.

use std::time::Instant;
use tracing::{info, warn};

use crate::storage::{StorageError, StoreMode};

use super::{EngineState, MirrorEngine};

impl MirrorEngine {
    /// Open the local store and initialize every registered entity.
    ///
    /// Startup flow:
    /// 1. Open the store (durable file, or memory as fallback)
    /// 2. Create and migrate each entity table; this arms validation timers
    ///
    /// An entity whose init fails is logged and retried on first use; only a
    /// store that cannot be opened at all fails startup.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<StoreMode, StorageError> {
        let started = Instant::now();
        info!("Starting mirror engine...");
        self.set_state(EngineState::Starting);

        let mode = match self.store.open().await {
            Ok(mode) => mode,
            Err(e) => {
                warn!(error = %e, "Local store unavailable, engine not started");
                self.set_state(EngineState::Created);
                return Err(e);
            }
        };

        let caches: Vec<_> = self.caches.read().values().cloned().collect();
        let mut ready = 0usize;
        for cache in &caches {
            if cache.init().await {
                ready += 1;
            } else {
                warn!(table = %cache.table_name(), "Entity init deferred to first use");
            }
        }

        self.set_state(EngineState::Running);
        info!(
            ?mode,
            entities = caches.len(),
            ready,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Mirror engine running"
        );
        Ok(mode)
    }

    /// Stop validation timers and close the store.
    ///
    /// In-flight validation passes run to completion against the closing
    /// store and resolve to skipped or unhealthy.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Initiating mirror engine shutdown...");
        self.set_state(EngineState::ShuttingDown);

        for cache in self.caches.read().values() {
            cache.stop_timer();
        }
        self.store.close().await;

        self.set_state(EngineState::Stopped);
        info!("Mirror engine shutdown complete");
    }
}

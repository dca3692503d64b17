// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for entity-mirror.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `entity_mirror_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `table`: local entity table name
//! - `outcome`: healthy, unhealthy, skipped
//! - `action`: fetched, deleted

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the terminal outcome of one validation pass
pub fn record_validation(table: &str, outcome: &str) {
    counter!(
        "entity_mirror_validations_total",
        "table" => table.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record validation pass duration
pub fn record_validation_latency(table: &str, duration: Duration) {
    histogram!(
        "entity_mirror_validation_seconds",
        "table" => table.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record rows touched by repair
pub fn record_repair(table: &str, action: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "entity_mirror_repair_rows_total",
        "table" => table.to_string(),
        "action" => action.to_string()
    )
    .increment(count as u64);
}

/// Record a wipe-and-rebootstrap
pub fn record_full_refetch(table: &str, reason: &str) {
    counter!(
        "entity_mirror_full_refetch_total",
        "table" => table.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record mismatched blocks found by block comparison
pub fn record_block_mismatches(table: &str, count: usize) {
    histogram!(
        "entity_mirror_block_mismatches",
        "table" => table.to_string()
    )
    .record(count as f64);
}

/// Set current local row count
pub fn set_local_rows(table: &str, count: u64) {
    gauge!(
        "entity_mirror_local_rows",
        "table" => table.to_string()
    )
    .set(count as f64);
}

/// Record a failed remote call by error class (client, server, network, decode)
pub fn record_remote_error(operation: &str, class: &str) {
    counter!(
        "entity_mirror_remote_errors_total",
        "operation" => operation.to_string(),
        "class" => class.to_string()
    )
    .increment(1);
}

/// Record a bulk chunk that failed and was skipped
pub fn record_chunk_failure(table: &str, operation: &str) {
    counter!(
        "entity_mirror_chunk_failures_total",
        "table" => table.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a schema migration (columns added)
pub fn record_migration(table: &str, columns_added: usize) {
    counter!(
        "entity_mirror_columns_added_total",
        "table" => table.to_string()
    )
    .increment(columns_added as u64);
}

/// Record the durable store falling back to memory
pub fn record_store_fallback() {
    counter!("entity_mirror_store_fallback_total").increment(1);
}

/// Record a local store failure
pub fn record_store_error(operation: &str) {
    counter!(
        "entity_mirror_store_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record an emitted cache event
pub fn record_event(kind: &str) {
    counter!(
        "entity_mirror_events_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record engine state transitions
pub fn set_engine_state(state: &str) {
    counter!(
        "entity_mirror_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Records validation latency on drop.
pub struct LatencyTimer {
    table: String,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_validation_latency(&self.table, self.start.elapsed());
    }
}

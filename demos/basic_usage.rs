// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic entity-mirror usage example.
//!
//! Demonstrates:
//! 1. Registering an entity against an in-process authority
//! 2. Bootstrapping the local mirror with a validation pass
//! 3. Local writes and change events
//! 4. Drift on the authority repaired block by block
//! 5. Diagnosing a row whose hash disagrees
//! 6. Displaying captured metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;

use entity_mirror::{
    ColumnDescriptor, EngineState, EntityDescriptor, MemoryAuthority, MirrorConfig, MirrorEngine,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           entity-mirror: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Authority and engine
    // ─────────────────────────────────────────────────────────────────────────
    let teams = || {
        EntityDescriptor::new("teams", "/api/teams")
            .column(ColumnDescriptor::integer("id").primary_key())
            .column(ColumnDescriptor::text("name"))
            .column(ColumnDescriptor::boolean("active"))
            .column(ColumnDescriptor::timestamp("updated_at"))
    };

    let authority = Arc::new(MemoryAuthority::new());
    authority.register(teams())?;
    authority.insert_many(
        "teams",
        (1..=2500).map(|i| {
            json!({
                "id": i,
                "name": format!("Team {}", i),
                "active": i % 5 != 0,
                "updated_at": 1_704_067_200_000i64 + i * 1000,
            })
        }),
    )?;

    let engine = MirrorEngine::new(MirrorConfig::manual(), authority.clone(), authority.clone());
    let cache = engine.register(teams())?;
    engine.start().await?;
    assert_eq!(engine.state(), EngineState::Running);
    println!("🚀 Engine running with entities {:?}", engine.entities());

    engine.subscribe(|event| println!("   └─ event: {} on {}", event.kind(), event.table()));

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Bootstrap
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📥 First validation (empty mirror)...");
    let report = cache.validate().await;
    println!("   {} | fetched {} rows", report.outcome, report.stats.rows_fetched);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Local writes
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Local upsert...");
    let created = cache
        .create_remote(&json!({"name": "Newcomers", "active": true}).as_object().cloned().unwrap_or_default())
        .await?;
    cache.upsert(created).await?;
    println!("   Local rows: {}", cache.count().await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Drift and repair
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔧 Authority renames team 1500 and drops team 7...");
    authority.set_field("teams", 1500, "name", json!("Renamed"))?;
    authority.remove("teams", 7);
    authority.clear_fetch_log();

    let diagnosis = cache.diagnose_row(1500).await?;
    for field in &diagnosis.divergence {
        println!("   └─ {} differs: local={:?} authority={:?}", field.field, field.local, field.authority);
    }

    let report = cache.validate().await;
    println!("   {} after steps {:?}", report.outcome, report.steps);
    println!(
        "   fetched={} deleted={} blocks={} ids={:?}",
        report.stats.rows_fetched,
        report.stats.rows_deleted,
        report.stats.blocks_repaired,
        authority.fetched_ids()
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        let rendered = match value {
            DebugValue::Counter(c) => c.to_string(),
            DebugValue::Gauge(g) => format!("{:.0}", g.into_inner()),
            DebugValue::Histogram(h) => format!("{} samples", h.len()),
        };
        println!("   └─ {} = {}", key.key().name(), rendered);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    engine.shutdown().await;
    println!("\n👋 Engine state: {}", engine.state());
    Ok(())
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic sharing-engine usage example.
//!
//! Demonstrates:
//! 1. Opening the engine with a SQLite-backed action queue
//! 2. Sharing a list and its entries
//! 3. Sharing an annotation and linking it to the list
//! 4. Feeding local writes through the storage hook
//! 5. Displaying metrics
//! 6. Cleaning up the queue file
//!
//! Everything remote runs against the in-memory backend, so no services
//! are needed.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use sharing_sync_engine::remote::memory::{InMemoryBackend, RecordingActivityStreams, StaticAuth};
use sharing_sync_engine::storage::local::{Annotation, LocalData, LocalList, PageListEntry};
use sharing_sync_engine::storage::memory::InMemoryStore;
use sharing_sync_engine::storage::PAGE_LIST_ENTRIES;
use sharing_sync_engine::{ContentSharing, SharingEngineConfig, StorageChange, StorageChangeEvent};

const QUEUE_PATH: &str = "./sharing_queue.db";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the engine emits)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║         sharing-sync-engine: Basic Usage Example              ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and open the engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring sharing engine...");

    let config = SharingEngineConfig {
        // Survives restarts; leftovers are replayed by setup()
        queue_path: Some(QUEUE_PATH.into()),
        // Small chunks so the demo shows several remote calls
        list_entry_chunk_size: 2,
        ..Default::default()
    };

    let store = Arc::new(InMemoryStore::new());
    let backend = Arc::new(InMemoryBackend::new());
    let local = LocalData::new(store.clone());

    let sharing = ContentSharing::open(
        config,
        store,
        backend.clone(),
        Arc::new(StaticAuth::logged_in("demo-user")),
        Arc::new(RecordingActivityStreams::new()),
    )
    .await?;
    sharing.setup().await;
    println!("   ✅ Engine ready! Scheduler: {:?}", sharing.scheduler_status());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Seed local data and share a list
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Creating a local list with 3 pages...");

    local
        .insert_custom_list(&LocalList { id: 1, name: "Reading".into(), created_at: Some(1_700_000_000_000) })
        .await?;
    for page in ["rust-lang.org", "tokio.rs", "docs.rs"] {
        local
            .upsert_page(page, &format!("https://{page}/"), Some(&format!("About {page}")))
            .await?;
        local
            .insert_list_entry(&PageListEntry {
                list_id: 1,
                page_url: page.into(),
                full_url: format!("https://{page}/"),
                created_at: None,
            })
            .await?;
        println!("   └─ Added: {page}");
    }

    let start = std::time::Instant::now();
    let remote_list_id = sharing.share_list(1).await?;
    println!("   ⚡ Shared list 1 as {remote_list_id} ({:?})", start.elapsed());

    sharing.share_list_entries(1, None).await?;
    sharing.wait_for_sync().await?;
    println!("   └─ Remote entries: {:?}", backend.list_entries(&remote_list_id));

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Share an annotation, then make it visible in the list
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🖍️  Sharing an annotation...");

    let annotation_url = "tokio.rs/#1700000000001".to_string();
    local
        .create_annotation(&Annotation {
            url: annotation_url.clone(),
            page_url: "tokio.rs".into(),
            body: Some("Tokio is a runtime for writing reliable asynchronous applications".into()),
            comment: Some("worth a read".into()),
            selector: Some(json!({"quote": "reliable"})),
            created_when: Some(1_700_000_000_001),
        })
        .await?;

    sharing.share_annotation(&annotation_url, None).await?;
    sharing
        .share_annotations_to_lists(std::slice::from_ref(&annotation_url), None)
        .await?;
    sharing.wait_for_sync().await?;

    if let Some(link) = sharing.get_remote_annotation_link(&annotation_url).await? {
        println!("   └─ Link: {link}");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Local writes flow through the storage hook
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔁 Adding a page through the storage hook...");

    let mut events = sharing.subscribe();
    local.upsert_page("crates.io", "https://crates.io/", Some("crates.io")).await?;
    let entry = PageListEntry {
        list_id: 1,
        page_url: "crates.io".into(),
        full_url: "https://crates.io/".into(),
        created_at: None,
    };
    local.insert_list_entry(&entry).await?;
    sharing
        .handle_post_storage_change(&StorageChangeEvent::local(vec![StorageChange::create(
            PAGE_LIST_ENTRIES,
            json!([1, "crates.io"]),
            serde_json::to_value(&entry)?,
        )]))
        .await?;
    sharing.wait_for_sync().await?;

    while let Ok(event) = events.try_recv() {
        println!("   └─ Event: {}", serde_json::to_string(&event)?);
    }
    println!("   └─ Remote entries: {:?}", backend.list_entries(&remote_list_id));
    println!("   └─ Pending actions: {}", sharing.pending_action_count().await?);

    for list in sharing.get_all_remote_lists().await? {
        println!("   └─ {} → {} ({})", list.local_id, list.remote_id, list.name);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean up
    // ─────────────────────────────────────────────────────────────────────────
    drop(sharing);
    println!("\n🧹 Cleaning up queue file...");
    if let Err(e) = std::fs::remove_file(QUEUE_PATH) {
        if e.kind() != std::io::ErrorKind::NotFound {
            println!("   └─ Warning: could not remove queue: {}", e);
        }
    } else {
        println!("   └─ Removed: {QUEUE_PATH}");
    }
    let _ = std::fs::remove_file(format!("{QUEUE_PATH}-shm"));
    let _ = std::fs::remove_file(format!("{QUEUE_PATH}-wal"));

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name.to_string(), label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name.to_string(), label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                let avg = if count > 0 { sum / count as f64 } else { 0.0 };
                histograms.push((name.to_string(), label_str, count, avg));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }

    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }

    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, labels, count, avg) in &histograms {
            println!("      └─ {}{} count={} avg={:.4}", name, labels, count, avg);
        }
    }
}

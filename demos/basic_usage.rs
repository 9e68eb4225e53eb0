// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic tier-access usage example.
//!
//! Demonstrates:
//! 1. Registering types and starting the engine against an in-process service
//! 2. Writing notes (mirrored to disk and memory)
//! 3. Reading them back offline-first, cache-preferred and by disk search
//! 4. Going offline: a queuable write is parked and redelivered later
//! 5. Displaying metrics (OTEL-compatible)
//! 6. Clean shutdown
//!
//! The remote service is a small in-memory stand-in so the example runs
//! without a network. Swap it for `HttpTransport` (the default) and set
//! `base_url` to talk to a real API.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tier_access::storage::sqlite::IN_MEMORY;
use tier_access::{
    AccessEngine, AccessEngineConfig, AccessError, EngineState, FetchRequest, Method,
    MutationRequest, ProgressFn, Result, Transport, TypeBinding, TypeRegistry,
};

/// Stand-in remote service: a JSON collection per path, and a kill switch.
#[derive(Default)]
struct DemoService {
    notes: Mutex<BTreeMap<i64, Value>>,
    offline: AtomicBool,
}

impl DemoService {
    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(AccessError::transport("network unreachable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for DemoService {
    async fn get(&self, url: &str) -> Result<Value> {
        self.check()?;
        let notes = self.notes.lock();
        match url.rsplit('/').next().and_then(|last| last.parse::<i64>().ok()) {
            Some(id) => Ok(notes.get(&id).cloned().unwrap_or(Value::Null)),
            None => Ok(Value::Array(notes.values().cloned().collect())),
        }
    }

    async fn send(&self, method: Method, _url: &str, body: &Value) -> Result<Value> {
        self.check()?;
        let mut notes = self.notes.lock();
        let items = match body {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        for item in items {
            match method {
                Method::Delete => {
                    if let Some(id) = item.as_i64() {
                        notes.remove(&id);
                    }
                }
                _ => {
                    if let Some(id) = item.get("id").and_then(Value::as_i64) {
                        notes.insert(id, item);
                    }
                }
            }
        }
        // Empty reply: the engine echoes what it sent
        Ok(Value::Null)
    }

    async fn upload(
        &self,
        _url: &str,
        _file: &Path,
        _key: &str,
        _params: &BTreeMap<String, String>,
        _progress: &ProgressFn,
    ) -> Result<Value> {
        Err(AccessError::Configuration("uploads are not part of this demo".into()))
    }

    async fn download(&self, _url: &str, _dest: &Path, _progress: &ProgressFn) -> Result<PathBuf> {
        Err(AccessError::Configuration("downloads are not part of this demo".into()))
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures all metrics for OTEL export)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           tier-access: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring tier-access...");

    let mut registry = TypeRegistry::new();
    registry.register("note", TypeBinding::new().memory(true).disk(true))?;

    let config = AccessEngineConfig {
        base_url: "https://notes.demo".into(),
        // Throwaway stores for the demo
        disk_path: IN_MEMORY.into(),
        queue_path: IN_MEMORY.into(),
        // Retry parked writes quickly
        redelivery_poll_ms: 200,
        ..Default::default()
    };

    let service = Arc::new(DemoService::default());
    let mut engine = AccessEngine::builder(config, registry)
        .transport(service.clone())
        .build()?;
    println!("   State: {}", engine.state());

    println!("\n🚀 Starting engine (opening stores)...");
    engine.start().await?;
    assert_eq!(engine.state(), EngineState::Running);
    println!("   ✅ Engine running! State: {}", engine.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Write notes
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Creating notes...");
    let created = engine
        .post_list(
            MutationRequest::post("note", true)
                .path("notes")
                .batch(vec![
                    json!({"id": 1, "text": "buy milk", "tag": "home"}),
                    json!({"id": 2, "text": "ship release", "tag": "work"}),
                    json!({"id": 3, "text": "water plants", "tag": "home"}),
                ])
                .cache()
                .build()?,
        )
        .single()
        .await?;
    println!("   └─ Created: {created}");

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Read back
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Reading back...");
    for id in 1..=3_i64 {
        let start = std::time::Instant::now();
        let note = engine
            .fetch_offline(
                FetchRequest::builder("note", true)
                    .path(format!("notes/{id}"))
                    .id(id)
                    .should_cache(true)
                    .build()?,
            )
            .single()
            .await?;
        println!("   └─ note {id} → {note} ({:?})", start.elapsed());
    }

    let home = engine.search_disk("note", "tag", json!("home")).single().await?;
    println!("   └─ Disk search tag=home → {} notes", home.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Offline write, redelivered when the network returns
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Going offline...");
    service.offline.store(true, Ordering::SeqCst);

    let result = engine
        .patch_object(
            MutationRequest::patch("note", true)
                .path("notes/2")
                .payload(json!({"id": 2, "text": "ship release (done)"}))
                .queuable()
                .build()?,
        )
        .single()
        .await;
    println!("   └─ Patch while offline: {:?}", result.err());
    println!("   └─ Queue: {:?}", engine.queue_stats());

    println!("\n📶 Back online, waiting for redelivery...");
    service.offline.store(false, Ordering::SeqCst);
    for _ in 0..50 {
        if engine.queue_stats().map_or(true, |s| s.pending_jobs == 0) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    println!("   └─ Queue: {:?}", engine.queue_stats());
    println!("   └─ Remote now has: {}", service.notes.lock().get(&2).cloned().unwrap_or_default());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Dump raw metrics (OTEL-compatible)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics (OTEL export format):");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.shutdown().await;
    println!("   ✅ Shutdown complete! State: {}", engine.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics in OTEL-compatible format
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_kind, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort();
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
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("   │  └─ {}{} count={} avg={:.6}", name, labels, count, avg);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the access engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `access_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for byte counters
//!
//! # Labels
//! - `tier`: memory, disk, cloud
//! - `operation`: read_one, read_many, write, delete, clear, search
//! - `status`: hit, miss, error, success

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record one tier operation and its outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "access_engine_tier_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "access_engine_tier_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A read chain moved past a tier
pub fn record_fallback(from: &str, reason: &str) {
    counter!(
        "access_engine_fallbacks_total",
        "from" => from.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Shared in-flight request: `started` for the first subscriber, `joined`
/// for the rest
pub fn record_multicast(outcome: &'static str) {
    counter!("access_engine_multicast_subscriptions_total", "outcome" => outcome).increment(1);
}

/// A failed request was parked for redelivery
pub fn record_enqueued(kind: &str) {
    counter!("access_engine_jobs_enqueued_total", "kind" => kind.to_string()).increment(1);
}

/// Redelivery outcome: succeeded, rescheduled, exhausted, rejected
pub fn record_redelivery(kind: &str, outcome: &str) {
    counter!(
        "access_engine_redeliveries_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Jobs currently stored in the redelivery queue
pub fn set_queue_depth(count: u64) {
    gauge!("access_engine_queue_depth").set(count as f64);
}

/// Bytes moved by file transfers
pub fn record_transfer_bytes(direction: &str, bytes: u64) {
    counter!("access_engine_transfer_bytes_total", "direction" => direction.to_string()).increment(bytes);
}

/// Engine lifecycle state (one-hot gauge per state)
pub fn set_engine_state(state: &str) {
    for s in ["Created", "Starting", "Running", "ShuttingDown", "Stopped"] {
        gauge!("access_engine_state", "state" => s).set(if s == state { 1.0 } else { 0.0 });
    }
}

/// Records latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}

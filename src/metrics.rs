// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sharing queue and sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `sharing_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: action wire name (`ensure-page-info`, `share-annotations`, ...)
//! - `mode`: queue interaction (`queue-and-return`, `queue-and-await`, `skip-queue`)
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::action::QueueInteraction;

fn mode_label(mode: QueueInteraction) -> &'static str {
    match mode {
        QueueInteraction::QueueAndReturn => "queue-and-return",
        QueueInteraction::QueueAndAwait => "queue-and-await",
        QueueInteraction::SkipQueue => "skip-queue",
    }
}

/// Record an action handed to the scheduler
pub fn record_action_scheduled(kind: &'static str, mode: QueueInteraction) {
    counter!(
        "sharing_sync_actions_scheduled_total",
        "kind" => kind,
        "mode" => mode_label(mode)
    )
    .increment(1);
}

/// Record an action executed against the backend
pub fn record_action_executed(kind: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "sharing_sync_actions_executed_total",
        "kind" => kind,
        "status" => status
    )
    .increment(1);
}

/// Record action execution latency
pub fn record_action_latency(kind: &'static str, duration: Duration) {
    histogram!(
        "sharing_sync_action_seconds",
        "kind" => kind
    )
    .record(duration.as_secs_f64());
}

/// Set number of actions waiting in the queue
pub fn set_queue_depth(depth: u64) {
    gauge!("sharing_sync_queue_depth").set(depth as f64);
}

/// Record a finished drain pass
pub fn record_drain(executed: usize, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("sharing_sync_drains_total", "status" => status).increment(1);
    histogram!("sharing_sync_drain_actions").record(executed as f64);
}

/// Record a retry timer being armed
pub fn record_retry_scheduled() {
    counter!("sharing_sync_retries_scheduled_total").increment(1);
}

/// Record a processed user message (`joined-collection`, `created-annotation`)
pub fn record_user_message(kind: &'static str, outcome: &'static str) {
    counter!(
        "sharing_sync_user_messages_total",
        "kind" => kind,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record sync log entries moved in one direction (`push` or `pull`)
pub fn record_sync_entries(direction: &'static str, count: usize) {
    counter!(
        "sharing_sync_log_entries_total",
        "direction" => direction
    )
    .increment(count as u64);
}

/// Record an incremental sync round
pub fn record_sync_round(success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    counter!("sharing_sync_rounds_total", "status" => status).increment(1);
    histogram!("sharing_sync_round_seconds").record(duration.as_secs_f64());
}

/// Record an initial sync event by name
pub fn record_initial_sync_event(event: &'static str) {
    counter!(
        "sharing_sync_initial_sync_events_total",
        "event" => event
    )
    .increment(1);
}

/// A timing guard that records action latency on drop
pub struct LatencyTimer {
    kind: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_action_latency(self.kind, self.start.elapsed());
    }
}

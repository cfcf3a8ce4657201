//! Metrics instrumentation for hindsight-dns.
//!
//! All metrics are prefixed with `hindsight.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::batch::Batch;
use crate::store::EvictionEvent;

/// How an observation was handled.
#[derive(Debug, Clone, Copy)]
pub enum ObservationResult {
    /// Applied to the store.
    Applied,
    /// Rejected as invalid telemetry.
    Invalid,
}

/// Record one telemetry observation.
pub fn record_observation(result: ObservationResult, duration: std::time::Duration) {
    let result_str = match result {
        ObservationResult::Applied => "applied",
        ObservationResult::Invalid => "invalid",
    };
    counter!("hindsight.telemetry.count", "result" => result_str).increment(1);
    histogram!("hindsight.telemetry.duration.seconds").record(duration.as_secs_f64());
}

/// Record an invalid datagram dropped before reaching the store.
pub fn record_invalid_telemetry() {
    counter!("hindsight.telemetry.count", "result" => "invalid").increment(1);
}

/// Record a best-resolution change (a pending zone refresh).
pub fn record_best_changed() {
    counter!("hindsight.store.best_changed.count").increment(1);
}

/// Record one eviction pass.
pub fn record_eviction(event: &EvictionEvent) {
    counter!("hindsight.eviction.count").increment(1);
    counter!("hindsight.eviction.resolutions_removed.count")
        .increment(event.removed.len() as u64);
    counter!("hindsight.eviction.addresses_recycled.count")
        .increment(event.recycled.len() as u64);
    counter!("hindsight.eviction.addresses_deleted.count").increment(event.deleted.len() as u64);
    histogram!("hindsight.eviction.overage").record(event.overage as f64);
    histogram!("hindsight.eviction.selected").record(event.selected as f64);
}

/// Record a garbage record encountered during the zone reload.
pub fn record_zone_garbage() {
    counter!("hindsight.zone.garbage.count").increment(1);
}

/// Record a completed refresh batch.
pub fn record_batch(batch: &Batch) {
    let result = if batch.succeeded() {
        "success".to_string()
    } else if let Some(rcode) = batch.rcode {
        format!("{rcode}")
    } else {
        "transport_error".to_string()
    };
    counter!("hindsight.batch.count", "result" => result).increment(1);
    histogram!("hindsight.batch.addresses").record(batch.addresses.len() as f64);
    histogram!("hindsight.batch.wire_request_bytes").record(batch.wire_request_bytes as f64);
    histogram!("hindsight.batch.wire_response_bytes").record(batch.wire_response_bytes as f64);
    if let Some(elapsed) = batch.elapsed_accumulating() {
        histogram!("hindsight.batch.accumulating.seconds").record(elapsed);
    }
    if let Some(elapsed) = batch.elapsed_processing() {
        histogram!("hindsight.batch.processing.seconds").record(elapsed);
    }
}

/// Record engine state counts (call periodically or on change).
pub fn record_engine_counts(
    associations: usize,
    resolutions: usize,
    queue_len: usize,
    zone_entries: usize,
) {
    gauge!("hindsight.store.associations.count").set(associations as f64);
    gauge!("hindsight.store.resolutions.count").set(resolutions as f64);
    gauge!("hindsight.store.queue.depth").set(queue_len as f64);
    gauge!("hindsight.zone.entries.count").set(zone_entries as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

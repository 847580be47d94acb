//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host process installs a recorder.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod metric_names {
    pub const FRAMES_STABILIZED_TOTAL: &str = "doppel_frames_stabilized_total";
    pub const DEGRADED_MOTION_TOTAL: &str = "doppel_degraded_motion_frames_total";
    pub const SEGMENTS_PLANNED: &str = "doppel_segments_planned";
    pub const SEGMENTS_COMPLETED_TOTAL: &str = "doppel_segments_completed_total";
    pub const SEGMENTS_FAILED_TOTAL: &str = "doppel_segments_failed_total";
    pub const SEGMENT_DURATION_SECONDS: &str = "doppel_segment_duration_seconds";
    pub const ORACLE_CALLS_TOTAL: &str = "doppel_oracle_calls_total";
    pub const ORACLE_LATENCY_SECONDS: &str = "doppel_oracle_latency_seconds";
    pub const DETECTION_MISSES_TOTAL: &str = "doppel_detection_misses_total";
    pub const FOOT_CORRECTIONS_TOTAL: &str = "doppel_foot_corrections_total";
    pub const SCRATCH_PEAK_BYTES: &str = "doppel_scratch_peak_bytes";
    pub const INPAINT_FALLBACKS_TOTAL: &str = "doppel_inpaint_fallbacks_total";
}

pub fn record_stabilized_frames(count: usize) {
    counter!(metric_names::FRAMES_STABILIZED_TOTAL).increment(count as u64);
}

pub fn record_degraded_motion() {
    counter!(metric_names::DEGRADED_MOTION_TOTAL).increment(1);
}

pub fn record_segment_plan(segments: usize) {
    gauge!(metric_names::SEGMENTS_PLANNED).set(segments as f64);
}

/// Record a finished segment and how long it took.
pub fn record_segment_completed(segment: usize, duration_secs: f64) {
    let labels = [("segment", segment.to_string())];
    counter!(metric_names::SEGMENTS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(metric_names::SEGMENT_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_segment_failed(segment: usize, reason: &str) {
    let labels = [
        ("segment", segment.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!(metric_names::SEGMENTS_FAILED_TOTAL, &labels).increment(1);
}

/// Record one synthesis call and its wall-clock latency.
pub fn record_oracle_call(latency_secs: f64) {
    counter!(metric_names::ORACLE_CALLS_TOTAL).increment(1);
    histogram!(metric_names::ORACLE_LATENCY_SECONDS).record(latency_secs);
}

pub fn record_detection_miss() {
    counter!(metric_names::DETECTION_MISSES_TOTAL).increment(1);
}

pub fn record_foot_corrections(count: usize) {
    counter!(metric_names::FOOT_CORRECTIONS_TOTAL).increment(count as u64);
}

pub fn record_scratch_peak(bytes: usize) {
    gauge!(metric_names::SCRATCH_PEAK_BYTES).set(bytes as f64);
}

pub fn record_inpaint_fallback(kind: &str) {
    counter!(metric_names::INPAINT_FALLBACKS_TOTAL, "kind" => kind.to_string()).increment(1);
}

//! Metrics collection for restore orchestration
//!
//! Provides Prometheus-compatible metrics for restore outcomes, per-tier job
//! durations, verification results and rollbacks.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder,
    HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

use crate::tier::Tier;

lazy_static! {
    /// Counter for top-level restore invocations
    static ref RESTORES: IntCounterVec = register_int_counter_vec!(
        "drctl_restores_total",
        "Total number of restore invocations",
        &["scope", "outcome"]
    ).unwrap();

    /// Counter for per-tier restore jobs
    static ref TIER_JOBS: IntCounterVec = register_int_counter_vec!(
        "drctl_tier_jobs_total",
        "Total number of tier restore jobs",
        &["tier", "outcome"]
    ).unwrap();

    /// Histogram for tier restore duration, data load plus health probe
    static ref TIER_DURATION: HistogramVec = register_histogram_vec!(
        "drctl_tier_restore_duration_seconds",
        "Tier restore duration in seconds",
        &["tier"],
        vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]
    ).unwrap();

    /// Counter for verification runs
    static ref VERIFICATIONS: IntCounterVec = register_int_counter_vec!(
        "drctl_verifications_total",
        "Total number of backup set verifications",
        &["result"]
    ).unwrap();

    /// Counter for rollback attempts
    static ref ROLLBACKS: IntCounterVec = register_int_counter_vec!(
        "drctl_rollbacks_total",
        "Total number of rollback attempts",
        &["tier", "result"]
    ).unwrap();

    /// Gauge for restores in flight
    static ref RESTORES_IN_FLIGHT: IntGauge = register_int_gauge!(
        "drctl_restores_in_flight",
        "Number of restore invocations currently holding tier locks"
    ).unwrap();
}

/// Record a finished (or rejected) restore invocation
pub fn record_restore(scope: &str, outcome: &str) {
    RESTORES.with_label_values(&[scope, outcome]).inc();
}

/// Record a finished tier job
pub fn record_tier_job(tier: Tier, outcome: &str, duration_secs: f64) {
    TIER_JOBS.with_label_values(&[tier.name(), outcome]).inc();
    TIER_DURATION
        .with_label_values(&[tier.name()])
        .observe(duration_secs);
}

/// Record a verification result
pub fn record_verification(ok: bool) {
    let result = if ok { "pass" } else { "fail" };
    VERIFICATIONS.with_label_values(&[result]).inc();
}

/// Record a rollback attempt
pub fn record_rollback(tier: Tier, result: &str) {
    ROLLBACKS.with_label_values(&[tier.name(), result]).inc();
}

/// Track restores holding locks
pub fn restore_started() {
    RESTORES_IN_FLIGHT.inc();
}

/// Track restores releasing locks
pub fn restore_finished() {
    RESTORES_IN_FLIGHT.dec();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

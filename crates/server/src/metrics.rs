//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions (counters, histograms, gauges)
//! - Helper functions for recording admission and job outcomes

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "longrun_admissions_total",
        "Admission attempts by outcome (admitted, in_progress, unavailable)"
    );
    describe_counter!(
        "longrun_jobs_finished_total",
        "Jobs that reached a terminal state, by state"
    );
    describe_gauge!("longrun_active_jobs", "Jobs currently executing");
    describe_histogram!(
        "longrun_job_duration_seconds",
        "Wall time from dispatch to terminal state"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record the outcome of one admission attempt.
pub fn record_admission(outcome: &'static str) {
    counter!("longrun_admissions_total", "outcome" => outcome).increment(1);
}

/// Record a job starting execution.
pub fn record_job_started() {
    gauge!("longrun_active_jobs").increment(1.0);
}

/// Record a job reaching a terminal state.
pub fn record_job_finished(state: &'static str, duration: Duration) {
    gauge!("longrun_active_jobs").decrement(1.0);
    counter!("longrun_jobs_finished_total", "state" => state).increment(1);
    histogram!("longrun_job_duration_seconds", "state" => state).record(duration.as_secs_f64());
}

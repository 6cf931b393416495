//! Metrics for turn and job execution
//!
//! Thin wrappers over the `metrics` facade. Without an installed exporter
//! every call is a no-op.
//!
//! # Metrics
//!
//! - `coro_jobs_total`: Counter of finished backend jobs by backend and outcome
//! - `coro_job_latency_ms`: Histogram of job latency by backend
//! - `coro_jobs_active`: Gauge of in-flight backend jobs
//! - `coro_turns_total`: Counter of dispatch rounds by kind
//! - `coro_stale_results_total`: Counter of results from superseded turns
//! - `coro_auto_retries_total`: Counter of automatically retried backends
//!
//! # Examples
//!
//! ```
//! use coro::metrics::JobMetrics;
//!
//! let metrics = JobMetrics::new("gemini");
//! metrics.record_success(420);
//! ```

use ::metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::cell::Cell;

/// Metrics for one backend job
///
/// Increments the active gauge on creation and decrements it exactly once,
/// either when an outcome is recorded or on drop.
#[derive(Debug)]
pub struct JobMetrics {
    backend_id: String,
    recorded: Cell<bool>,
}

impl JobMetrics {
    /// Start tracking a job for `backend_id`
    pub fn new(backend_id: &str) -> Self {
        increment_gauge!("coro_jobs_active", 1.0, "backend" => backend_id.to_string());
        Self {
            backend_id: backend_id.to_string(),
            recorded: Cell::new(false),
        }
    }

    /// Record a successful job
    pub fn record_success(&self, latency_ms: u64) {
        self.record("success", latency_ms);
    }

    /// Record a failed job with its error kind
    pub fn record_failure(&self, error_kind: &str, latency_ms: u64) {
        self.record(error_kind, latency_ms);
    }

    fn record(&self, outcome: &str, latency_ms: u64) {
        if self.recorded.get() {
            return;
        }
        self.recorded.set(true);

        histogram!(
            "coro_job_latency_ms",
            latency_ms as f64,
            "backend" => self.backend_id.clone()
        );
        increment_counter!(
            "coro_jobs_total",
            "backend" => self.backend_id.clone(),
            "outcome" => outcome.to_string()
        );
        decrement_gauge!("coro_jobs_active", 1.0, "backend" => self.backend_id.clone());
    }

    /// Backend this job serves
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }
}

impl Drop for JobMetrics {
    fn drop(&mut self) {
        if !self.recorded.get() {
            decrement_gauge!("coro_jobs_active", 1.0, "backend" => self.backend_id.clone());
        }
    }
}

/// Count one dispatch round (`submit`, `follow_up`, `broadcast`, `retry`)
pub fn record_round(kind: &str) {
    increment_counter!("coro_turns_total", "kind" => kind.to_string());
}

/// Count a result that arrived for a superseded turn
pub fn record_stale_result(applied: bool) {
    increment_counter!(
        "coro_stale_results_total",
        "action" => if applied { "applied" } else { "discarded" }
    );
}

/// Count backends re-dispatched by the automatic retry
pub fn record_auto_retries(count: usize) {
    ::metrics::counter!("coro_auto_retries_total", count as u64);
}

/// Initializes the metrics exporter for Prometheus
///
/// Only has an effect when built with the `prometheus` feature.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let _ = builder.install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}

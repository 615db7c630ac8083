//! Prometheus metrics exposed on the admin server's `/metrics` endpoint
//! (§A.6).
//!
//! One [`ReconcileMetrics`] instance is shared (via `Arc`) by every
//! reconciler's [`crate::context::Context`]; each reconciler labels its
//! counters with its own name so a single `bindery_reconcile_total` series
//! covers all five controllers.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, HistogramVec,
    IntCounterVec, Registry,
};

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: IntCounterVec,
    pub failures: IntCounterVec,
    pub duration_seconds: HistogramVec,
}

impl ReconcileMetrics {
    pub fn new(registry: &Registry) -> Self {
        let runs = register_int_counter_vec_with_registry!(
            "bindery_reconcile_total",
            "Number of times a reconciler ran",
            &["controller"],
            registry
        )
        .expect("bindery_reconcile_total registers exactly once");

        let failures = register_int_counter_vec_with_registry!(
            "bindery_reconcile_failures_total",
            "Number of reconciles that returned an error",
            &["controller"],
            registry
        )
        .expect("bindery_reconcile_failures_total registers exactly once");

        let duration_seconds = register_histogram_vec_with_registry!(
            "bindery_reconcile_duration_seconds",
            "Reconcile wall-clock time",
            &["controller"],
            vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0],
            registry
        )
        .expect("bindery_reconcile_duration_seconds registers exactly once");

        ReconcileMetrics { runs, failures, duration_seconds }
    }

    pub fn record_success(&self, controller: &str, elapsed_secs: f64) {
        self.runs.with_label_values(&[controller]).inc();
        self.duration_seconds.with_label_values(&[controller]).observe(elapsed_secs);
    }

    pub fn record_failure(&self, controller: &str, elapsed_secs: f64) {
        self.runs.with_label_values(&[controller]).inc();
        self.failures.with_label_values(&[controller]).inc();
        self.duration_seconds.with_label_values(&[controller]).observe(elapsed_secs);
    }
}

/// A stopwatch started at reconcile entry and consumed into a metrics
/// observation on exit, regardless of whether the reconcile succeeded.
pub struct ReconcileTimer {
    controller: &'static str,
    started: std::time::Instant,
}

impl ReconcileTimer {
    pub fn start(controller: &'static str) -> Self {
        ReconcileTimer { controller, started: std::time::Instant::now() }
    }

    pub fn finish(self, metrics: &ReconcileMetrics, succeeded: bool) {
        let elapsed = self.started.elapsed().as_secs_f64();
        if succeeded {
            metrics.record_success(self.controller, elapsed);
        } else {
            metrics.record_failure(self.controller, elapsed);
        }
    }
}

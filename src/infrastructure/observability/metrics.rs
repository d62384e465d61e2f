//! Prometheus metrics infrastructure

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::config::MetricsConfig;
use crate::domain::experiment::{ExperimentId, ExperimentStatus, VariantName};

/// Prometheus metrics handle for rendering the exposition text
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Get the metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Initialize Prometheus metrics
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    let builder = PrometheusBuilder::new();

    match builder.install_recorder() {
        Ok(handle) => {
            if config.include_build_info {
                register_default_metrics();
            }

            tracing::info!("Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

fn register_default_metrics() {
    gauge!("experiment_engine_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record a new user-to-variant assignment
pub fn record_assignment(experiment_id: &ExperimentId, variant: VariantName) {
    let labels = [
        ("experiment", experiment_id.to_string()),
        ("variant", variant.to_string()),
    ];

    counter!("experiment_assignments_total", &labels).increment(1);
}

/// Record an accepted metric sample
pub fn record_result(experiment_id: &ExperimentId, variant: VariantName) {
    let labels = [
        ("experiment", experiment_id.to_string()),
        ("variant", variant.to_string()),
    ];

    counter!("experiment_results_recorded_total", &labels).increment(1);
}

/// Record a rollback with a low-cardinality reason
pub fn record_rollback(experiment_id: &ExperimentId, reason: RollbackReason) {
    let labels = [
        ("experiment", experiment_id.to_string()),
        ("reason", reason.as_str().to_string()),
    ];

    counter!("experiment_rollbacks_total", &labels).increment(1);
}

/// Record a lifecycle transition into `status`
pub fn record_transition(experiment_id: &ExperimentId, status: ExperimentStatus) {
    let labels = [
        ("experiment", experiment_id.to_string()),
        ("status", status.to_string()),
    ];

    counter!("experiment_transitions_total", &labels).increment(1);
}

/// Record how long an analysis took
pub fn record_analysis_duration(experiment_id: &ExperimentId, duration: Duration) {
    histogram!(
        "experiment_analysis_duration_seconds",
        "experiment" => experiment_id.to_string()
    )
    .record(duration.as_secs_f64());
}

/// What caused a rollback, used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackReason {
    /// Requested through the public API
    Manual,
    /// A configured rollback condition was met
    Condition,
    /// The final analysis recommended it
    Analysis,
}

impl RollbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Condition => "condition",
            Self::Analysis => "analysis",
        }
    }
}

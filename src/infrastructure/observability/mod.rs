//! Observability infrastructure - Prometheus metrics

mod config;
mod metrics;

pub use config::MetricsConfig;
pub use metrics::{
    init_metrics, record_analysis_duration, record_assignment, record_result, record_rollback,
    record_transition, PrometheusMetrics, RollbackReason,
};

//! Observability configuration

use serde::Deserialize;

/// Prometheus metrics configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder
    #[serde(default)]
    pub enabled: bool,
    /// Publish an `experiment_engine_info` gauge carrying the crate version
    #[serde(default = "default_true")]
    pub include_build_info: bool,
}

fn default_true() -> bool {
    true
}

use serde::Deserialize;
use std::time::Duration;

use crate::domain::experiment::SignificanceMethod;
use crate::domain::DomainError;
use crate::infrastructure::observability::MetricsConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Tuning for the experiment engine
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Period of the live re-analysis of running experiments
    #[serde(default = "default_analysis_interval_secs")]
    pub analysis_interval_secs: u64,
    /// Period of the rollback-condition check for each running experiment
    #[serde(default = "default_rollback_check_interval_secs")]
    pub rollback_check_interval_secs: u64,
    /// Hard cap on experiment duration
    #[serde(default = "default_max_duration_days")]
    pub max_duration_days: u64,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default)]
    pub significance_method: SignificanceMethod,
    /// Oldest results are dropped beyond this many per experiment
    #[serde(default = "default_max_results_per_experiment")]
    pub max_results_per_experiment: usize,
    #[serde(default = "default_max_buffered_results_per_variant")]
    pub max_buffered_results_per_variant: usize,
    /// Mean error rate (percent) above which a variant raises risk to medium
    #[serde(default = "default_error_rate_risk_threshold")]
    pub error_rate_risk_threshold: f64,
    /// Tolerance of the `==` and `!=` rollback operators
    #[serde(default = "default_equality_epsilon")]
    pub equality_epsilon: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_analysis_interval_secs() -> u64 {
    60
}

fn default_rollback_check_interval_secs() -> u64 {
    10
}

fn default_max_duration_days() -> u64 {
    30
}

fn default_confidence_level() -> f64 {
    0.95
}

fn default_max_results_per_experiment() -> usize {
    50_000
}

fn default_max_buffered_results_per_variant() -> usize {
    1_000
}

fn default_error_rate_risk_threshold() -> f64 {
    5.0
}

fn default_equality_epsilon() -> f64 {
    1e-3
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analysis_interval_secs: default_analysis_interval_secs(),
            rollback_check_interval_secs: default_rollback_check_interval_secs(),
            max_duration_days: default_max_duration_days(),
            confidence_level: default_confidence_level(),
            significance_method: SignificanceMethod::default(),
            max_results_per_experiment: default_max_results_per_experiment(),
            max_buffered_results_per_variant: default_max_buffered_results_per_variant(),
            error_rate_risk_threshold: default_error_rate_risk_threshold(),
            equality_epsilon: default_equality_epsilon(),
        }
    }
}

impl EngineConfig {
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_secs)
    }

    pub fn rollback_check_interval(&self) -> Duration {
        Duration::from_secs(self.rollback_check_interval_secs)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_days * 24 * 60 * 60)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.analysis_interval_secs == 0 || self.rollback_check_interval_secs == 0 {
            return Err(DomainError::configuration(
                "Analysis and rollback check intervals must be positive",
            ));
        }

        if self.max_duration_days == 0 {
            return Err(DomainError::configuration("max_duration_days must be positive"));
        }

        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(DomainError::configuration(format!(
                "confidence_level must be between 0 and 1, got {}",
                self.confidence_level
            )));
        }

        if self.max_results_per_experiment == 0 || self.max_buffered_results_per_variant == 0 {
            return Err(DomainError::configuration("Result bounds must be positive"));
        }

        if !self.error_rate_risk_threshold.is_finite() || self.error_rate_risk_threshold < 0.0 {
            return Err(DomainError::configuration(
                "error_rate_risk_threshold must be a non-negative number",
            ));
        }

        if !self.equality_epsilon.is_finite() || self.equality_epsilon <= 0.0 {
            return Err(DomainError::configuration("equality_epsilon must be positive"));
        }

        Ok(())
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

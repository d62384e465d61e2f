//! Experiment domain entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::metrics::MetricKey;
use super::optimization::OptimizationConfig;
use super::rollback::RollbackCondition;
use super::targeting::{DeviceTargeting, UserTargeting};
use super::validation::{validate_experiment_id, ExperimentValidationError};

// ============================================================================
// ExperimentId
// ============================================================================

/// Unique identifier for an experiment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Create a new experiment ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ExperimentValidationError> {
        let id = id.into();
        validate_experiment_id(&id)?;
        Ok(Self(id))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExperimentId {
    type Error = ExperimentValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExperimentId> for String {
    fn from(id: ExperimentId) -> Self {
        id.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExperimentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// VariantName
// ============================================================================

/// Name of a treatment arm. `Control` is the baseline every other arm is compared to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantName {
    Control,
    VariantA,
    VariantB,
    VariantC,
}

impl VariantName {
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Control)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::VariantA => "variant_a",
            Self::VariantB => "variant_b",
            Self::VariantC => "variant_c",
        }
    }
}

impl fmt::Display for VariantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantName {
    type Err = ExperimentValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control" => Ok(Self::Control),
            "variant_a" => Ok(Self::VariantA),
            "variant_b" => Ok(Self::VariantB),
            "variant_c" => Ok(Self::VariantC),
            other => Err(ExperimentValidationError::UnknownVariant(other.to_string())),
        }
    }
}

// ============================================================================
// ExperimentStatus
// ============================================================================

/// Lifecycle status of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Defined but not yet exposed to users
    #[default]
    Draft,
    /// Assigning users and collecting samples
    Running,
    /// Temporarily stopped, can be started again
    Paused,
    /// Ended normally
    Completed,
    /// Aborted after a fault reported by the audio engine
    Failed,
    /// Terminated early by a rollback
    RolledBack,
}

impl ExperimentStatus {
    /// Check if the experiment is currently exposing users
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if the experiment has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }

    /// Check if `start` is allowed from this status
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Draft | Self::Paused)
    }

    /// Check if a transition to the target status is valid
    pub fn can_transition_to(&self, target: ExperimentStatus) -> bool {
        use ExperimentStatus::*;

        match (self, target) {
            (Draft, Running) | (Paused, Running) => true,
            (Running, Paused) => true,
            // A draft only leaves through start
            (Running | Paused, Completed) => true,
            (Running | Paused, Failed) => true,
            // A final analysis may still recommend rolling back a completed experiment
            (Running | Paused | Completed, RolledBack) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

// ============================================================================
// ExperimentCategory
// ============================================================================

/// Area of the audio pipeline an experiment is tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentCategory {
    BufferSize,
    Scheduling,
    Quality,
    Latency,
    Memory,
    #[default]
    General,
}

// ============================================================================
// Variant
// ============================================================================

/// A treatment arm with the optimization configuration it applies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    name: VariantName,
    #[serde(default)]
    description: String,
    #[serde(default)]
    config: OptimizationConfig,
    #[serde(default = "default_weight")]
    weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Variant {
    /// Create a new variant with an empty configuration
    pub fn new(name: VariantName) -> Self {
        Self {
            name,
            description: String::new(),
            config: OptimizationConfig::default(),
            weight: default_weight(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the optimization configuration
    pub fn with_config(mut self, config: OptimizationConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the relative weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn name(&self) -> VariantName {
        self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_control(&self) -> bool {
        self.name.is_control()
    }
}

// ============================================================================
// ExperimentConfig
// ============================================================================

/// Immutable definition of an experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    id: ExperimentId,
    name: String,
    #[serde(default)]
    category: ExperimentCategory,
    #[serde(default)]
    hypothesis: String,
    variants: Vec<Variant>,
    traffic_split: Vec<f64>,
    #[serde(rename = "duration_ms", with = "duration_millis")]
    duration: Duration,
    #[serde(default = "default_min_sample_size")]
    min_sample_size: usize,
    #[serde(default)]
    primary_metric: MetricKey,
    #[serde(default)]
    secondary_metrics: Vec<MetricKey>,
    #[serde(default = "default_success_threshold")]
    success_threshold: f64,
    #[serde(default)]
    rollback_conditions: Vec<RollbackCondition>,
    #[serde(default = "default_max_degradation")]
    max_degradation_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_targeting: Option<DeviceTargeting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_targeting: Option<UserTargeting>,
}

fn default_min_sample_size() -> usize {
    100
}

fn default_success_threshold() -> f64 {
    5.0
}

fn default_max_degradation() -> f64 {
    10.0
}

impl ExperimentConfig {
    /// Create a new definition with no variants and a seven day duration
    pub fn new(id: ExperimentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            category: ExperimentCategory::default(),
            hypothesis: String::new(),
            variants: Vec::new(),
            traffic_split: Vec::new(),
            duration: Duration::from_secs(7 * 24 * 60 * 60),
            min_sample_size: default_min_sample_size(),
            primary_metric: MetricKey::default(),
            secondary_metrics: Vec::new(),
            success_threshold: default_success_threshold(),
            rollback_conditions: Vec::new(),
            max_degradation_percent: default_max_degradation(),
            device_targeting: None,
            user_targeting: None,
        }
    }

    // Builder methods

    pub fn with_category(mut self, category: ExperimentCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_hypothesis(mut self, hypothesis: impl Into<String>) -> Self {
        self.hypothesis = hypothesis.into();
        self
    }

    /// Add a variant together with its traffic percentage
    pub fn with_variant(mut self, variant: Variant, traffic_percent: f64) -> Self {
        self.variants.push(variant);
        self.traffic_split.push(traffic_percent);
        self
    }

    /// Replace the traffic split wholesale (must index-align with the variants)
    pub fn with_traffic_split(mut self, split: Vec<f64>) -> Self {
        self.traffic_split = split;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_min_sample_size(mut self, min_sample_size: usize) -> Self {
        self.min_sample_size = min_sample_size;
        self
    }

    pub fn with_primary_metric(mut self, metric: MetricKey) -> Self {
        self.primary_metric = metric;
        self
    }

    pub fn with_secondary_metric(mut self, metric: MetricKey) -> Self {
        self.secondary_metrics.push(metric);
        self
    }

    pub fn with_success_threshold(mut self, percent: f64) -> Self {
        self.success_threshold = percent;
        self
    }

    pub fn with_rollback_condition(mut self, condition: RollbackCondition) -> Self {
        self.rollback_conditions.push(condition);
        self
    }

    pub fn with_max_degradation_percent(mut self, percent: f64) -> Self {
        self.max_degradation_percent = percent;
        self
    }

    pub fn with_device_targeting(mut self, targeting: DeviceTargeting) -> Self {
        self.device_targeting = Some(targeting);
        self
    }

    pub fn with_user_targeting(mut self, targeting: UserTargeting) -> Self {
        self.user_targeting = Some(targeting);
        self
    }

    // Getters

    pub fn id(&self) -> &ExperimentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> ExperimentCategory {
        self.category
    }

    pub fn hypothesis(&self) -> &str {
        &self.hypothesis
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn traffic_split(&self) -> &[f64] {
        &self.traffic_split
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn min_sample_size(&self) -> usize {
        self.min_sample_size
    }

    pub fn primary_metric(&self) -> MetricKey {
        self.primary_metric
    }

    pub fn secondary_metrics(&self) -> &[MetricKey] {
        &self.secondary_metrics
    }

    pub fn success_threshold(&self) -> f64 {
        self.success_threshold
    }

    pub fn rollback_conditions(&self) -> &[RollbackCondition] {
        &self.rollback_conditions
    }

    pub fn max_degradation_percent(&self) -> f64 {
        self.max_degradation_percent
    }

    pub fn device_targeting(&self) -> Option<&DeviceTargeting> {
        self.device_targeting.as_ref()
    }

    pub fn user_targeting(&self) -> Option<&UserTargeting> {
        self.user_targeting.as_ref()
    }

    /// Find a variant by name
    pub fn variant(&self, name: VariantName) -> Option<&Variant> {
        self.variants.iter().find(|v| v.name() == name)
    }

    /// Get the control variant if one exists
    pub fn control_variant(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control())
    }

    /// Select a variant for a bucket value in `0..100`.
    ///
    /// Walks the variants in definition order accumulating their traffic percentages and
    /// returns the first whose cumulative boundary exceeds `bucket`. Variants without a
    /// split entry are skipped. Falls back to control when nothing matches.
    pub fn variant_for_bucket(&self, bucket: u32) -> VariantName {
        let bucket = f64::from(bucket);
        let mut cumulative = 0.0;

        for (index, variant) in self.variants.iter().enumerate() {
            let Some(percent) = self.traffic_split.get(index) else {
                continue;
            };

            cumulative += percent;

            if bucket < cumulative {
                return variant.name();
            }
        }

        VariantName::Control
    }
}

/// Serialize a `Duration` as whole milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

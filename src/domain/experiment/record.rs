//! Recorded samples (append-only events)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{ExperimentId, VariantName};
use super::metrics::{ExperimentMetrics, PerformanceMetrics};
use super::targeting::DeviceInfo;

/// Unique identifier for a recorded result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentResultId(String);

impl ExperimentResultId {
    /// Create a result ID from an existing value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique ID
    pub fn generate() -> Self {
        Self(format!("expres-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExperimentResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One metric sample reported for a variant. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    id: ExperimentResultId,
    pub experiment_id: ExperimentId,
    pub variant: VariantName,
    /// Sample exactly as reported by the audio engine
    pub raw: PerformanceMetrics,
    /// Single-observation statistics derived from `raw`
    pub metrics: ExperimentMetrics,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    pub recorded_at: DateTime<Utc>,
}

impl ExperimentResult {
    /// Create a result stamped with the current time
    pub fn new(
        experiment_id: ExperimentId,
        variant: VariantName,
        raw: PerformanceMetrics,
        session_id: impl Into<String>,
    ) -> Self {
        let metrics = ExperimentMetrics::from_sample(&raw);

        Self {
            id: ExperimentResultId::generate(),
            experiment_id,
            variant,
            raw,
            metrics,
            session_id: session_id.into(),
            user_id: None,
            device_info: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = Some(device_info);
        self
    }

    pub fn with_recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = recorded_at;
        self
    }

    pub fn id(&self) -> &ExperimentResultId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_creation() {
        let result = ExperimentResult::new(
            ExperimentId::new("exp1").unwrap(),
            VariantName::VariantA,
            PerformanceMetrics::new(20.0, 35.0, 800.0, 0),
            "sess1",
        );

        assert!(result.id().as_str().starts_with("expres-"));
        assert_eq!(result.variant, VariantName::VariantA);
        assert_eq!(result.metrics.latency.mean, 20.0);
        assert_eq!(result.metrics.latency.count, 1);
        assert!(result.user_id.is_none());
    }

    #[test]
    fn test_result_builder_chain() {
        let result = ExperimentResult::new(
            ExperimentId::new("exp1").unwrap(),
            VariantName::Control,
            PerformanceMetrics::new(40.0, 50.0, 900.0, 2),
            "sess2",
        )
        .with_user_id("userA")
        .with_device_info(DeviceInfo {
            platform: "linux".into(),
            ..Default::default()
        });

        assert_eq!(result.user_id.as_deref(), Some("userA"));
        assert_eq!(result.device_info.unwrap().platform, "linux");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(ExperimentResultId::generate(), ExperimentResultId::generate());
    }
}

//! Experiment domain module for audio-performance A/B testing
//!
//! This module provides the types and traits for defining experiments that compare
//! audio optimization settings against a control configuration, recording performance
//! samples and reporting analysis results.

mod assignment;
mod entity;
mod metrics;
mod optimization;
mod record;
mod repository;
mod result;
mod rollback;
mod state;
mod targeting;
mod validation;

// Re-export all public types
pub use assignment::UserAssignments;
pub use entity::{
    ExperimentCategory, ExperimentConfig, ExperimentId, ExperimentStatus, Variant, VariantName,
};
pub use metrics::{ExperimentMetrics, MetricKey, PerformanceMetrics, StatisticalMetrics};
pub use optimization::{OptimizationConfig, QualityLevel, SchedulingAlgorithm, TuningParameter};
pub use record::{ExperimentResult, ExperimentResultId};
pub use repository::ExperimentStore;
pub use result::{
    ExperimentAnalysis, Recommendation, RecommendationType, RiskAssessment, RiskLevel,
    SignificanceMethod, StatisticalSignificance, VariantAnalysis,
};
pub use rollback::{ComparisonOperator, RollbackCondition};
pub use state::ExperimentState;
pub use targeting::{DeviceInfo, DeviceInfoProvider, DeviceTargeting, UserTargeting};
pub use validation::{
    validate_experiment_config, validate_experiment_id, ExperimentValidationError,
    DEFAULT_MAX_DURATION,
};

#[cfg(test)]
pub use repository::mock::MockExperimentStore;

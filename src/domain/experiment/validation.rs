//! Experiment validation utilities

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;

use super::entity::ExperimentConfig;

/// Maximum length for experiment IDs
pub const MAX_EXPERIMENT_ID_LENGTH: usize = 64;

/// Minimum number of variants an experiment must define
pub const MIN_VARIANTS: usize = 2;

/// Allowed deviation of the traffic split total from 100
pub const TRAFFIC_SPLIT_TOLERANCE: f64 = 0.1;

/// Default hard cap on experiment duration
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Validation errors for experiment definitions
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExperimentValidationError {
    #[error("Experiment ID cannot be empty")]
    EmptyId,

    #[error("Experiment ID exceeds maximum length of {0} characters")]
    IdTooLong(usize),

    #[error("Experiment ID must start with a letter or number")]
    InvalidIdStart,

    #[error("Experiment ID contains invalid character: '{0}'")]
    InvalidIdCharacter(char),

    #[error("Experiment name cannot be empty")]
    EmptyName,

    #[error("Unknown variant: '{0}'")]
    UnknownVariant(String),

    #[error("Experiment must have at least {MIN_VARIANTS} variants, got {0}")]
    InsufficientVariants(usize),

    #[error("Duplicate variant: '{0}'")]
    DuplicateVariant(String),

    #[error("Experiment must define exactly one control variant")]
    MissingControl,

    #[error("Traffic split has {split} entries but there are {variants} variants")]
    TrafficSplitLength { split: usize, variants: usize },

    #[error("Traffic split entries must be finite and non-negative, got {0}")]
    InvalidTrafficValue(f64),

    #[error("Traffic split must sum to 100, got {0}")]
    InvalidTrafficSum(f64),

    #[error("Experiment duration must be greater than zero")]
    ZeroDuration,

    #[error("Experiment duration {actual_secs}s exceeds the maximum of {max_secs}s")]
    DurationTooLong { actual_secs: u64, max_secs: u64 },

    #[error("Minimum sample size must be at least 1")]
    InvalidMinSampleSize,

    #[error("{field} must be a finite, non-negative percentage, got {value}")]
    InvalidPercentage { field: &'static str, value: f64 },

    #[error("Rollback condition on '{0}' has an invalid threshold or window")]
    InvalidRollbackCondition(String),
}

/// Validate an experiment ID
pub fn validate_experiment_id(id: &str) -> Result<(), ExperimentValidationError> {
    let Some(first_char) = id.chars().next() else {
        return Err(ExperimentValidationError::EmptyId);
    };

    if id.len() > MAX_EXPERIMENT_ID_LENGTH {
        return Err(ExperimentValidationError::IdTooLong(MAX_EXPERIMENT_ID_LENGTH));
    }

    if !first_char.is_ascii_alphanumeric() {
        return Err(ExperimentValidationError::InvalidIdStart);
    }

    if let Some(ch) = id
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
    {
        return Err(ExperimentValidationError::InvalidIdCharacter(ch));
    }

    Ok(())
}

/// Validate a complete experiment definition against the given duration cap.
///
/// Checks run in a fixed order and the first failure is returned.
pub fn validate_experiment_config(
    config: &ExperimentConfig,
    max_duration: Duration,
) -> Result<(), ExperimentValidationError> {
    validate_experiment_id(config.id().as_str())?;

    if config.name().trim().is_empty() {
        return Err(ExperimentValidationError::EmptyName);
    }

    let variants = config.variants();

    if variants.len() < MIN_VARIANTS {
        return Err(ExperimentValidationError::InsufficientVariants(
            variants.len(),
        ));
    }

    let mut seen = HashSet::new();

    for variant in variants {
        if !seen.insert(variant.name()) {
            return Err(ExperimentValidationError::DuplicateVariant(
                variant.name().to_string(),
            ));
        }
    }

    if config.control_variant().is_none() {
        return Err(ExperimentValidationError::MissingControl);
    }

    validate_traffic_split(config.traffic_split(), variants.len())?;

    if config.duration().is_zero() {
        return Err(ExperimentValidationError::ZeroDuration);
    }

    if config.duration() > max_duration {
        return Err(ExperimentValidationError::DurationTooLong {
            actual_secs: config.duration().as_secs(),
            max_secs: max_duration.as_secs(),
        });
    }

    if config.min_sample_size() == 0 {
        return Err(ExperimentValidationError::InvalidMinSampleSize);
    }

    validate_percentage("success_threshold", config.success_threshold())?;
    validate_percentage("max_degradation_percent", config.max_degradation_percent())?;

    for condition in config.rollback_conditions() {
        if !condition.threshold.is_finite() || condition.window.is_zero() {
            return Err(ExperimentValidationError::InvalidRollbackCondition(
                condition.metric.to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_traffic_split(split: &[f64], variants: usize) -> Result<(), ExperimentValidationError> {
    if split.len() != variants {
        return Err(ExperimentValidationError::TrafficSplitLength {
            split: split.len(),
            variants,
        });
    }

    if let Some(value) = split.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(ExperimentValidationError::InvalidTrafficValue(*value));
    }

    let total: f64 = split.iter().sum();

    if (total - 100.0).abs() > TRAFFIC_SPLIT_TOLERANCE {
        return Err(ExperimentValidationError::InvalidTrafficSum(total));
    }

    Ok(())
}

fn validate_percentage(field: &'static str, value: f64) -> Result<(), ExperimentValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ExperimentValidationError::InvalidPercentage { field, value });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{
        ComparisonOperator, ExperimentId, MetricKey, RollbackCondition, Variant, VariantName,
    };

    fn valid_config() -> ExperimentConfig {
        ExperimentConfig::new(ExperimentId::new("exp1").unwrap(), "Buffer size trial")
            .with_variant(Variant::new(VariantName::Control), 50.0)
            .with_variant(Variant::new(VariantName::VariantA), 50.0)
            .with_duration(Duration::from_secs(3600))
    }

    fn validate(config: &ExperimentConfig) -> Result<(), ExperimentValidationError> {
        validate_experiment_config(config, DEFAULT_MAX_DURATION)
    }

    mod experiment_id_validation {
        use super::*;

        #[test]
        fn test_valid_experiment_ids() {
            assert!(validate_experiment_id("exp1").is_ok());
            assert!(validate_experiment_id("buffer-size-test").is_ok());
            assert!(validate_experiment_id("sched_rr_2024").is_ok());
        }

        #[test]
        fn test_empty_id() {
            assert_eq!(
                validate_experiment_id(""),
                Err(ExperimentValidationError::EmptyId)
            );
        }

        #[test]
        fn test_id_too_long() {
            let long_id = "a".repeat(MAX_EXPERIMENT_ID_LENGTH + 1);
            assert_eq!(
                validate_experiment_id(&long_id),
                Err(ExperimentValidationError::IdTooLong(MAX_EXPERIMENT_ID_LENGTH))
            );
        }

        #[test]
        fn test_invalid_start_and_characters() {
            assert_eq!(
                validate_experiment_id("-abc"),
                Err(ExperimentValidationError::InvalidIdStart)
            );
            assert_eq!(
                validate_experiment_id("abc def"),
                Err(ExperimentValidationError::InvalidIdCharacter(' '))
            );
        }
    }

    mod config_validation {
        use super::*;

        #[test]
        fn test_valid_config() {
            assert!(validate(&valid_config()).is_ok());
        }

        #[test]
        fn test_blank_name_rejected() {
            let config = ExperimentConfig::new(ExperimentId::new("exp1").unwrap(), "  ")
                .with_variant(Variant::new(VariantName::Control), 50.0)
                .with_variant(Variant::new(VariantName::VariantA), 50.0);

            assert_eq!(validate(&config), Err(ExperimentValidationError::EmptyName));
        }

        #[test]
        fn test_single_variant_rejected() {
            let config = ExperimentConfig::new(ExperimentId::new("exp1").unwrap(), "One arm")
                .with_variant(Variant::new(VariantName::Control), 100.0);

            assert_eq!(
                validate(&config),
                Err(ExperimentValidationError::InsufficientVariants(1))
            );
        }

        #[test]
        fn test_duplicate_variant_rejected() {
            let config = ExperimentConfig::new(ExperimentId::new("exp1").unwrap(), "Dupes")
                .with_variant(Variant::new(VariantName::Control), 50.0)
                .with_variant(Variant::new(VariantName::Control), 50.0);

            assert_eq!(
                validate(&config),
                Err(ExperimentValidationError::DuplicateVariant("control".into()))
            );
        }

        #[test]
        fn test_missing_control_rejected() {
            let config = ExperimentConfig::new(ExperimentId::new("exp1").unwrap(), "No control")
                .with_variant(Variant::new(VariantName::VariantA), 50.0)
                .with_variant(Variant::new(VariantName::VariantB), 50.0);

            assert_eq!(
                validate(&config),
                Err(ExperimentValidationError::MissingControl)
            );
        }

        #[test]
        fn test_traffic_split_within_tolerance() {
            let config = valid_config().with_traffic_split(vec![50.05, 50.0]);
            assert!(validate(&config).is_ok());

            let config = valid_config().with_traffic_split(vec![33.35, 66.6]);
            assert!(validate(&config).is_ok());
        }

        #[test]
        fn test_traffic_split_outside_tolerance() {
            let config = valid_config().with_traffic_split(vec![50.0, 49.8]);
            assert!(matches!(
                validate(&config),
                Err(ExperimentValidationError::InvalidTrafficSum(_))
            ));

            let config = valid_config().with_traffic_split(vec![60.0, 60.0]);
            assert!(matches!(
                validate(&config),
                Err(ExperimentValidationError::InvalidTrafficSum(_))
            ));
        }

        #[test]
        fn test_traffic_split_length_mismatch() {
            let config = valid_config().with_traffic_split(vec![100.0]);
            assert_eq!(
                validate(&config),
                Err(ExperimentValidationError::TrafficSplitLength {
                    split: 1,
                    variants: 2
                })
            );
        }

        #[test]
        fn test_negative_split_rejected() {
            let config = valid_config().with_traffic_split(vec![110.0, -10.0]);
            assert_eq!(
                validate(&config),
                Err(ExperimentValidationError::InvalidTrafficValue(-10.0))
            );
        }

        #[test]
        fn test_duration_cap() {
            let config = valid_config().with_duration(DEFAULT_MAX_DURATION);
            assert!(validate(&config).is_ok());

            let config =
                valid_config().with_duration(DEFAULT_MAX_DURATION + Duration::from_secs(1));
            assert!(matches!(
                validate(&config),
                Err(ExperimentValidationError::DurationTooLong { .. })
            ));

            let config = valid_config().with_duration(Duration::ZERO);
            assert_eq!(validate(&config), Err(ExperimentValidationError::ZeroDuration));
        }

        #[test]
        fn test_min_sample_size_and_percentages() {
            let config = valid_config().with_min_sample_size(0);
            assert_eq!(
                validate(&config),
                Err(ExperimentValidationError::InvalidMinSampleSize)
            );

            let config = valid_config().with_success_threshold(f64::NAN);
            assert!(matches!(
                validate(&config),
                Err(ExperimentValidationError::InvalidPercentage {
                    field: "success_threshold",
                    ..
                })
            ));
        }

        #[test]
        fn test_rollback_condition_needs_window() {
            let config = valid_config().with_rollback_condition(RollbackCondition::new(
                MetricKey::Latency,
                ComparisonOperator::GreaterThan,
                100.0,
                Duration::ZERO,
            ));

            assert_eq!(
                validate(&config),
                Err(ExperimentValidationError::InvalidRollbackCondition(
                    "latency".into()
                ))
            );
        }
    }
}

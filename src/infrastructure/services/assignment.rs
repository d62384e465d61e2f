//! Eligibility filtering and deterministic variant selection

use std::sync::Arc;

use crate::domain::experiment::{DeviceInfoProvider, ExperimentConfig, VariantName};
use crate::infrastructure::experiment::Bucketer;

/// Why a user was not placed into an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligibility {
    /// Excluded by the user include/exclude lists
    UserTargeting,
    /// Outside the exposure percentage
    NotExposed,
    /// Device targeting is configured but no device info is available
    UnknownDevice,
    /// Device does not match the targeting rules
    DeviceTargeting,
}

/// Stateless assignment logic. Memoization lives with the caller.
#[derive(Debug, Clone, Default)]
pub struct AssignmentEngine {
    device_provider: Option<Arc<dyn DeviceInfoProvider>>,
}

impl AssignmentEngine {
    pub fn new(device_provider: Option<Arc<dyn DeviceInfoProvider>>) -> Self {
        Self { device_provider }
    }

    pub fn device_provider(&self) -> Option<&Arc<dyn DeviceInfoProvider>> {
        self.device_provider.as_ref()
    }

    /// Check the experiment's user and device targeting for a user
    pub fn check_eligibility(
        &self,
        config: &ExperimentConfig,
        user_id: &str,
    ) -> Result<(), Ineligibility> {
        if let Some(targeting) = config.user_targeting() {
            if !targeting.allows(user_id) {
                return Err(Ineligibility::UserTargeting);
            }

            if let Some(percent) = targeting.exposure_percent {
                if !Bucketer::is_exposed(user_id, config.id().as_str(), percent) {
                    return Err(Ineligibility::NotExposed);
                }
            }
        }

        if let Some(targeting) = config.device_targeting() {
            let device = self
                .device_provider
                .as_ref()
                .and_then(|provider| provider.device_info(user_id))
                .ok_or(Ineligibility::UnknownDevice)?;

            if !targeting.matches(&device) {
                return Err(Ineligibility::DeviceTargeting);
            }
        }

        Ok(())
    }

    /// Pure bucketing: the same user, experiment and config always give the same variant
    pub fn select_variant(config: &ExperimentConfig, user_id: &str) -> VariantName {
        config.variant_for_bucket(Bucketer::bucket(user_id, config.id().as_str()))
    }
}

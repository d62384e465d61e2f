//! Eligibility rules and the device-info collaborator

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Capabilities of the device a user is running on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
    pub browser: String,
    pub cpu_cores: u32,
    /// Device memory in GB
    pub memory_gb: f64,
    pub is_low_end: bool,
}

/// Supplies device information for the eligibility check.
///
/// Called synchronously while assigning a variant, so implementations must not block.
pub trait DeviceInfoProvider: Send + Sync + Debug {
    /// Device information for a user, or `None` when unknown
    fn device_info(&self, user_id: &str) -> Option<DeviceInfo>;
}

/// Device requirements for taking part in an experiment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTargeting {
    /// Allowed platforms (case-insensitive). Empty allows all.
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Allowed browsers (case-insensitive). Empty allows all.
    #[serde(default)]
    pub browsers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cpu_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_memory_gb: Option<f64>,
    #[serde(default)]
    pub exclude_low_end: bool,
}

impl DeviceTargeting {
    /// Check a device against every rule
    pub fn matches(&self, device: &DeviceInfo) -> bool {
        if !self.platforms.is_empty()
            && !self
                .platforms
                .iter()
                .any(|p| p.eq_ignore_ascii_case(&device.platform))
        {
            return false;
        }

        if !self.browsers.is_empty()
            && !self
                .browsers
                .iter()
                .any(|b| b.eq_ignore_ascii_case(&device.browser))
        {
            return false;
        }

        if self.min_cpu_cores.is_some_and(|min| device.cpu_cores < min) {
            return false;
        }

        if self.min_memory_gb.is_some_and(|min| device.memory_gb < min) {
            return false;
        }

        !(self.exclude_low_end && device.is_low_end)
    }
}

/// User-level inclusion rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserTargeting {
    /// When non-empty, only these users are eligible
    #[serde(default)]
    pub include_users: Vec<String>,
    /// Users that are never eligible
    #[serde(default)]
    pub exclude_users: Vec<String>,
    /// Share of users exposed to the experiment at all, in percent. Gated by a hash
    /// salted differently from the variant bucket so exposure and arm are independent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_percent: Option<f64>,
}

impl UserTargeting {
    /// Check the include/exclude lists. Exposure gating is applied by the assignment engine.
    pub fn allows(&self, user_id: &str) -> bool {
        if self.exclude_users.iter().any(|u| u == user_id) {
            return false;
        }

        self.include_users.is_empty() || self.include_users.iter().any(|u| u == user_id)
    }
}

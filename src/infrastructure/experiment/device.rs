//! Device-info provider backed by a fixed table

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::experiment::{DeviceInfo, DeviceInfoProvider};

/// Returns per-user device info registered up front, with an optional fallback
#[derive(Debug, Default)]
pub struct StaticDeviceInfoProvider {
    devices: RwLock<HashMap<String, DeviceInfo>>,
    fallback: Option<DeviceInfo>,
}

impl StaticDeviceInfoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device reported for users without an explicit entry
    pub fn with_fallback(mut self, device: DeviceInfo) -> Self {
        self.fallback = Some(device);
        self
    }

    pub fn with_device(self, user_id: impl Into<String>, device: DeviceInfo) -> Self {
        self.register(user_id, device);
        self
    }

    /// Register or replace the device of a user
    pub fn register(&self, user_id: impl Into<String>, device: DeviceInfo) {
        if let Ok(mut devices) = self.devices.write() {
            devices.insert(user_id.into(), device);
        }
    }
}

impl DeviceInfoProvider for StaticDeviceInfoProvider {
    fn device_info(&self, user_id: &str) -> Option<DeviceInfo> {
        self.devices
            .read()
            .ok()
            .and_then(|devices| devices.get(user_id).cloned())
            .or_else(|| self.fallback.clone())
    }
}

//! Infrastructure layer for audio experiments
//!
//! Provides bucketing, statistics, store implementations and device-info providers.

mod bucketing;
mod device;
mod file_store;
mod in_memory_store;
mod statistical;

pub use bucketing::{Bucketer, BUCKET_COUNT};
pub use device::StaticDeviceInfoProvider;
pub use file_store::FileExperimentStore;
pub use in_memory_store::InMemoryExperimentStore;
pub use statistical::{
    calculate_significance, improvement_over_baseline, mean, performance_score,
    relative_change, variance, welch_t_test, PLACEHOLDER_SIGNIFICANT_P_VALUE,
};

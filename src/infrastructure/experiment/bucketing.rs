//! Deterministic bucketing for experiment variant assignment
//!
//! Ensures the same user always lands in the same bucket for a given experiment,
//! across calls and process restarts.

/// Number of buckets; traffic splits are expressed in percent
pub const BUCKET_COUNT: u32 = 100;

const EXPOSURE_SALT: &str = ":exposure";

/// Stable hasher for experiment assignments
#[derive(Debug, Clone, Copy)]
pub struct Bucketer;

impl Bucketer {
    /// 32-bit polynomial rolling hash (`h = h * 31 + c`, wrapping)
    ///
    /// Unlike `DefaultHasher`, the result is fixed for a given input forever, which keeps
    /// assignments reproducible between builds.
    pub fn hash(input: impl AsRef<str>) -> u32 {
        input
            .as_ref()
            .chars()
            .fold(0i32, |hash, ch| {
                hash.wrapping_mul(31).wrapping_add(ch as i32)
            })
            .unsigned_abs()
    }

    /// Variant bucket (0-99) for a user and experiment
    pub fn bucket(user_id: &str, experiment_id: &str) -> u32 {
        Self::hash(format!("{}{}", user_id, experiment_id)) % BUCKET_COUNT
    }

    /// Exposure bucket (0-99), salted so it is independent of [`Bucketer::bucket`]
    pub fn exposure_bucket(user_id: &str, experiment_id: &str) -> u32 {
        Self::hash(format!("{}{}{}", user_id, experiment_id, EXPOSURE_SALT)) % BUCKET_COUNT
    }

    /// Whether a user falls inside an exposure percentage (0-100)
    pub fn is_exposed(user_id: &str, experiment_id: &str, exposure_percent: f64) -> bool {
        f64::from(Self::exposure_bucket(user_id, experiment_id)) < exposure_percent
    }
}

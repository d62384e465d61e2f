//! Rollback conditions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::entity::duration_millis;
use super::metrics::MetricKey;

/// Comparison applied between a windowed mean and a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    /// Compare `value` against `threshold`. Equality uses `epsilon` as tolerance.
    pub fn compare(&self, value: f64, threshold: f64, epsilon: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterThanOrEqual => value >= threshold,
            Self::LessThanOrEqual => value <= threshold,
            Self::Equal => (value - threshold).abs() < epsilon,
            Self::NotEqual => (value - threshold).abs() >= epsilon,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric threshold that, when the mean over `window` crosses it, forces a rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackCondition {
    pub metric: MetricKey,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    #[serde(rename = "window_ms", with = "duration_millis")]
    pub window: Duration,
}

impl RollbackCondition {
    pub fn new(
        metric: MetricKey,
        operator: ComparisonOperator,
        threshold: f64,
        window: Duration,
    ) -> Self {
        Self {
            metric,
            operator,
            threshold,
            window,
        }
    }
}

impl fmt::Display for RollbackCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} over {}ms",
            self.metric,
            self.operator,
            self.threshold,
            self.window.as_millis()
        )
    }
}

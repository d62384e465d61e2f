//! Analysis report types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{ExperimentId, ExperimentStatus, VariantName};
use super::metrics::ExperimentMetrics;

// ============================================================================
// Significance
// ============================================================================

/// How statistical significance is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceMethod {
    /// Significant as soon as every variant has the minimum sample size, with a fixed
    /// p-value. Not a hypothesis test.
    #[default]
    Placeholder,
    /// Welch's t-test on the primary metric of each treatment against control
    WelchTTest,
}

/// Outcome of the significance step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalSignificance {
    pub method: SignificanceMethod,
    pub is_significant: bool,
    pub p_value: f64,
    /// Confidence level used (e.g., 0.95 for 95%)
    pub confidence_level: f64,
    /// Whether every variant reached `min_sample_size`
    pub sample_size_met: bool,
}

// ============================================================================
// VariantAnalysis
// ============================================================================

/// Aggregated results for one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAnalysis {
    pub variant: VariantName,
    pub sample_size: usize,
    pub metrics: ExperimentMetrics,
    /// 0-100, 50 means "at baseline" for the primary metric
    pub performance_score: f64,
    /// Relative score change against control in percent. `None` for control itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement_over_control: Option<f64>,
}

// ============================================================================
// Risk
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    /// Human-readable reasons behind `level`
    pub factors: Vec<String>,
    pub rollback_recommended: bool,
}

impl RiskAssessment {
    /// Raise the level (never lowers it) and note why
    pub fn escalate(&mut self, level: RiskLevel, factor: impl Into<String>) {
        self.level = self.level.max(level);
        self.factors.push(factor.into());
        self.rollback_recommended = self.level == RiskLevel::High;
    }
}

// ============================================================================
// Recommendation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    /// Stop exposure and revert to control
    Rollback,
    /// Ship the winning variant
    Deploy,
    /// Keep collecting data
    Extend,
    /// No clear winner; design a follow-up
    Iterate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationType,
    /// 1 is the most important
    pub priority: u8,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub reasoning: String,
    pub next_steps: Vec<String>,
}

// ============================================================================
// ExperimentAnalysis
// ============================================================================

/// Full report for an experiment. Recomputed from stored results on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentAnalysis {
    pub experiment_id: ExperimentId,
    pub status: ExperimentStatus,
    pub analyzed_at: DateTime<Utc>,
    pub total_samples: usize,
    pub significance: StatisticalSignificance,
    pub variant_results: Vec<VariantAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_variant: Option<VariantName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement_percent: Option<f64>,
    pub risk: RiskAssessment,
    /// Ordered by priority
    pub recommendations: Vec<Recommendation>,
}

impl ExperimentAnalysis {
    pub fn is_significant(&self) -> bool {
        self.significance.is_significant
    }

    pub fn p_value(&self) -> f64 {
        self.significance.p_value
    }

    /// Get the results for a specific variant
    pub fn variant_result(&self, variant: VariantName) -> Option<&VariantAnalysis> {
        self.variant_results.iter().find(|r| r.variant == variant)
    }

    /// The highest-priority recommendation
    pub fn primary_recommendation(&self) -> Option<&Recommendation> {
        self.recommendations.iter().min_by_key(|r| r.priority)
    }

    pub fn recommends_rollback(&self) -> bool {
        self.risk.rollback_recommended
    }
}

//! Experiment analysis: aggregation, significance, winner, risk and recommendations

use chrono::{DateTime, Utc};

use crate::domain::experiment::{
    ExperimentAnalysis, ExperimentConfig, ExperimentMetrics, ExperimentResult, ExperimentState,
    MetricKey, Recommendation, RecommendationType, RiskAssessment, RiskLevel, SignificanceMethod,
    StatisticalSignificance, VariantAnalysis, VariantName,
};
use crate::infrastructure::experiment::{calculate_significance, performance_score, relative_change};

/// Confidence attached to a rollback recommendation
const ROLLBACK_CONFIDENCE: f64 = 0.95;
/// Confidence attached to an iterate recommendation
const ITERATE_CONFIDENCE: f64 = 0.6;
/// Score used when a variant has no primary-metric samples
const NEUTRAL_SCORE: f64 = 50.0;

/// Computes [`ExperimentAnalysis`] reports. Stateless; every call starts from the results.
#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    method: SignificanceMethod,
    confidence_level: f64,
    error_rate_risk_threshold: f64,
}

impl AnalysisEngine {
    pub fn new(
        method: SignificanceMethod,
        confidence_level: f64,
        error_rate_risk_threshold: f64,
    ) -> Self {
        Self {
            method,
            confidence_level,
            error_rate_risk_threshold,
        }
    }

    /// Analyze an experiment from its current state
    pub fn analyze(&self, state: &ExperimentState, now: DateTime<Utc>) -> ExperimentAnalysis {
        let config = state.config();
        let results = state.results();
        let primary = config.primary_metric();

        let variant_results = self.variant_results(config, results.iter());

        let sample_size_met = variant_results
            .iter()
            .all(|v| v.sample_size >= config.min_sample_size());

        let significance = self.significance(config, results.iter(), sample_size_met);

        let winner = variant_results
            .iter()
            .filter(|v| !v.variant.is_control())
            .filter_map(|v| v.improvement_over_control.map(|i| (v.variant, i)))
            .filter(|(_, improvement)| *improvement >= config.success_threshold())
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let risk = self.assess_risk(config, &variant_results);

        let recommendations = self.recommend(
            config,
            &variant_results,
            &significance,
            winner,
            &risk,
            primary,
        );

        ExperimentAnalysis {
            experiment_id: config.id().clone(),
            status: state.status(),
            analyzed_at: now,
            total_samples: results.len(),
            significance,
            variant_results,
            winning_variant: winner.map(|(variant, _)| variant),
            improvement_percent: winner.map(|(_, improvement)| improvement),
            risk,
            recommendations,
        }
    }

    /// Aggregate per variant, in config order, and score against control
    fn variant_results<'a>(
        &self,
        config: &ExperimentConfig,
        results: impl Iterator<Item = &'a ExperimentResult> + Clone,
    ) -> Vec<VariantAnalysis> {
        let primary = config.primary_metric();

        let mut analyses: Vec<VariantAnalysis> = config
            .variants()
            .iter()
            .map(|variant| {
                let name = variant.name();
                let snapshots: Vec<&ExperimentMetrics> = results
                    .clone()
                    .filter(|r| r.variant == name)
                    .map(|r| &r.metrics)
                    .collect();

                let metrics = ExperimentMetrics::aggregate(snapshots.iter().copied());
                let primary_stats = metrics.get(primary);

                let performance_score = if primary_stats.is_empty() {
                    NEUTRAL_SCORE
                } else {
                    performance_score(primary, primary_stats.mean)
                };

                VariantAnalysis {
                    variant: name,
                    sample_size: snapshots.len(),
                    metrics,
                    performance_score,
                    improvement_over_control: None,
                }
            })
            .collect();

        let control = analyses
            .iter()
            .find(|v| v.variant.is_control())
            .filter(|v| !v.metrics.get(primary).is_empty())
            .map(|v| v.performance_score);

        if let Some(control_score) = control {
            for analysis in analyses.iter_mut() {
                if !analysis.variant.is_control() && !analysis.metrics.get(primary).is_empty() {
                    analysis.improvement_over_control =
                        Some(relative_change(analysis.performance_score, control_score));
                }
            }
        }

        analyses
    }

    fn significance<'a>(
        &self,
        config: &ExperimentConfig,
        results: impl Iterator<Item = &'a ExperimentResult> + Clone,
        sample_size_met: bool,
    ) -> StatisticalSignificance {
        let primary = config.primary_metric();

        let values_for = |variant: VariantName| -> Vec<f64> {
            results
                .clone()
                .filter(|r| r.variant == variant)
                .filter_map(|r| r.raw.value(primary))
                .collect()
        };

        let control = values_for(VariantName::Control);
        let treatments: Vec<Vec<f64>> = config
            .variants()
            .iter()
            .filter(|v| !v.is_control())
            .map(|v| values_for(v.name()))
            .collect();
        let treatment_refs: Vec<&[f64]> = treatments.iter().map(Vec::as_slice).collect();

        calculate_significance(
            self.method,
            &control,
            &treatment_refs,
            sample_size_met,
            self.confidence_level,
        )
    }

    fn assess_risk(&self, config: &ExperimentConfig, variants: &[VariantAnalysis]) -> RiskAssessment {
        let mut risk = RiskAssessment::default();

        for variant in variants {
            if let Some(change) = variant.improvement_over_control {
                if -change > config.max_degradation_percent() {
                    risk.escalate(
                        RiskLevel::High,
                        format!(
                            "{} performance score degraded {:.1}% vs control (limit {}%)",
                            variant.variant,
                            -change,
                            config.max_degradation_percent()
                        ),
                    );
                }
            }

            let error_rate = variant.metrics.get(MetricKey::ErrorRate);
            if !error_rate.is_empty() && error_rate.mean > self.error_rate_risk_threshold {
                risk.escalate(
                    RiskLevel::Medium,
                    format!(
                        "{} error rate {:.2}% exceeds {}%",
                        variant.variant, error_rate.mean, self.error_rate_risk_threshold
                    ),
                );
            }
        }

        risk
    }

    fn recommend(
        &self,
        config: &ExperimentConfig,
        variants: &[VariantAnalysis],
        significance: &StatisticalSignificance,
        winner: Option<(VariantName, f64)>,
        risk: &RiskAssessment,
        primary: MetricKey,
    ) -> Vec<Recommendation> {
        if risk.rollback_recommended {
            return vec![Recommendation {
                kind: RecommendationType::Rollback,
                priority: 1,
                confidence: ROLLBACK_CONFIDENCE,
                reasoning: format!("High risk detected: {}", risk.factors.join("; ")),
                next_steps: vec![
                    "Revert all users to the control configuration".to_string(),
                    "Inspect the degraded variant's audio traces before retrying".to_string(),
                    format!("Tighten rollback conditions on {}", primary),
                ],
            }];
        }

        let mut recommendations = Vec::new();

        match winner {
            Some((variant, improvement)) if significance.is_significant => {
                recommendations.push(Recommendation {
                    kind: RecommendationType::Deploy,
                    priority: 1,
                    confidence: significance.confidence_level,
                    reasoning: format!(
                        "{} improves the {} score by {:.1}% over control (threshold {}%)",
                        variant,
                        primary,
                        improvement,
                        config.success_threshold()
                    ),
                    next_steps: vec![
                        format!("Roll out {} configuration gradually", variant),
                        "Keep rollback conditions armed during rollout".to_string(),
                    ],
                });

                if risk.level >= RiskLevel::Medium {
                    recommendations.push(Recommendation {
                        kind: RecommendationType::Extend,
                        priority: 2,
                        confidence: ITERATE_CONFIDENCE,
                        reasoning: format!("Elevated risk: {}", risk.factors.join("; ")),
                        next_steps: vec![
                            "Monitor error rates closely before full rollout".to_string(),
                        ],
                    });
                }
            }
            _ if !significance.is_significant => {
                let smallest = variants.iter().map(|v| v.sample_size).min().unwrap_or(0);
                let progress =
                    (smallest as f64 / config.min_sample_size().max(1) as f64).min(1.0);

                let reasoning = if significance.sample_size_met {
                    format!(
                        "Difference not significant yet (p = {:.4}, need p < {:.2})",
                        significance.p_value,
                        1.0 - significance.confidence_level
                    )
                } else {
                    format!(
                        "Need more data: smallest variant has {} of {} required samples",
                        smallest,
                        config.min_sample_size()
                    )
                };

                recommendations.push(Recommendation {
                    kind: RecommendationType::Extend,
                    priority: 1,
                    confidence: (0.5 + progress * 0.3).min(0.8),
                    reasoning,
                    next_steps: vec![
                        "Keep the experiment running".to_string(),
                        "Consider raising traffic to under-sampled variants".to_string(),
                    ],
                });
            }
            _ => {
                recommendations.push(Recommendation {
                    kind: RecommendationType::Iterate,
                    priority: 1,
                    confidence: ITERATE_CONFIDENCE,
                    reasoning: format!(
                        "No variant beat control by the {}% success threshold",
                        config.success_threshold()
                    ),
                    next_steps: vec![
                        "Design a follow-up experiment with larger parameter changes".to_string(),
                        format!("Review secondary metrics besides {}", primary),
                    ],
                });
            }
        }

        recommendations
    }
}

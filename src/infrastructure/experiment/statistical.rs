//! Statistical analysis functions for audio experiments
//!
//! Provides the significance step of the analysis (fixed placeholder or Welch's
//! t-test) and the baseline-relative performance score.

use crate::domain::experiment::{MetricKey, SignificanceMethod, StatisticalSignificance};

/// p-value reported by the placeholder method once every variant has enough samples
pub const PLACEHOLDER_SIGNIFICANT_P_VALUE: f64 = 0.01;

/// Calculate p-value using Welch's t-test for two independent samples
///
/// Welch's t-test is preferred over Student's t-test when the two samples
/// may have unequal variances and/or unequal sample sizes.
///
/// # Returns
/// * `Some(p_value)` if calculation succeeds
/// * `None` if either sample has fewer than 2 elements or both have zero variance
pub fn welch_t_test(sample1: &[f64], sample2: &[f64]) -> Option<f64> {
    if sample1.len() < 2 || sample2.len() < 2 {
        return None;
    }

    let n1 = sample1.len() as f64;
    let n2 = sample2.len() as f64;

    let var1 = variance(sample1);
    let var2 = variance(sample2);

    let se = ((var1 / n1) + (var2 / n2)).sqrt();

    if se == 0.0 {
        return None;
    }

    let t = (mean(sample1) - mean(sample2)) / se;

    // Welch-Satterthwaite degrees of freedom
    let df_num = (var1 / n1 + var2 / n2).powi(2);
    let df_denom = ((var1 / n1).powi(2) / (n1 - 1.0)) + ((var2 / n2).powi(2) / (n2 - 1.0));

    if df_denom == 0.0 {
        return None;
    }

    let df = df_num / df_denom;

    Some(approximate_p_value(t.abs(), df).clamp(0.0, 1.0))
}

/// Calculate mean of a sample
pub fn mean(sample: &[f64]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    sample.iter().sum::<f64>() / sample.len() as f64
}

/// Calculate variance of a sample (sample variance, n-1 denominator)
pub fn variance(sample: &[f64]) -> f64 {
    if sample.len() < 2 {
        return 0.0;
    }

    let m = mean(sample);
    let n = sample.len() as f64;
    sample.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1.0)
}

/// Approximate two-tailed p-value from t-statistic and degrees of freedom
///
/// Normal approximation for large df, with a correction factor for small df.
fn approximate_p_value(t: f64, df: f64) -> f64 {
    if df > 30.0 {
        2.0 * (1.0 - normal_cdf(t))
    } else {
        let correction = 1.0 - 1.0 / (4.0 * df);
        2.0 * (1.0 - normal_cdf(t * correction.max(0.0).sqrt()))
    }
}

/// Standard normal cumulative distribution function
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Error function approximation (Abramowitz and Stegun 7.1.26), accurate to about 1.5e-7
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Decide significance for one experiment
///
/// # Arguments
/// * `method` - Placeholder or Welch's t-test
/// * `control` - Primary-metric values of the control variant
/// * `treatments` - Primary-metric values of each non-control variant
/// * `sample_size_met` - Whether every variant reached the minimum sample size
/// * `confidence_level` - Required confidence level (e.g., 0.95 for 95%)
pub fn calculate_significance(
    method: SignificanceMethod,
    control: &[f64],
    treatments: &[&[f64]],
    sample_size_met: bool,
    confidence_level: f64,
) -> StatisticalSignificance {
    let (is_significant, p_value) = match method {
        SignificanceMethod::Placeholder => {
            if sample_size_met {
                (true, PLACEHOLDER_SIGNIFICANT_P_VALUE)
            } else {
                (false, 1.0)
            }
        }
        SignificanceMethod::WelchTTest => {
            let p_value = treatments
                .iter()
                .filter_map(|treatment| welch_t_test(control, treatment))
                .fold(1.0_f64, f64::min);

            (sample_size_met && p_value < 1.0 - confidence_level, p_value)
        }
    };

    StatisticalSignificance {
        method,
        is_significant,
        p_value,
        confidence_level,
        sample_size_met,
    }
}

/// Percentage improvement of `value` over the metric's fixed baseline.
///
/// Positive is better: for lower-is-better metrics a value below baseline improves.
pub fn improvement_over_baseline(metric: MetricKey, value: f64) -> f64 {
    let baseline = metric.baseline();
    let change = (value - baseline) / baseline * 100.0;

    if metric.lower_is_better() {
        -change
    } else {
        change
    }
}

/// Map a primary-metric mean to a 0-100 score where 50 means "at baseline"
pub fn performance_score(metric: MetricKey, value: f64) -> f64 {
    (50.0 + improvement_over_baseline(metric, value) / 2.0).clamp(0.0, 100.0)
}

/// Relative change of `score` against `reference`, in percent
pub fn relative_change(score: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        return if score > 0.0 { 100.0 } else { 0.0 };
    }

    (score - reference) / reference * 100.0
}

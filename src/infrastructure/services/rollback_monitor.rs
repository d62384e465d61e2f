//! Rollback-condition evaluation over a sliding time window

use chrono::{DateTime, Utc};

use crate::domain::experiment::{ExperimentConfig, ExperimentResult, RollbackCondition};

/// A rollback condition that evaluated true
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredCondition {
    pub condition: RollbackCondition,
    /// Mean of the metric over the window
    pub observed: f64,
    /// Results that fell inside the window and reported the metric
    pub samples: usize,
}

impl TriggeredCondition {
    /// Human-readable rollback reason
    pub fn reason(&self) -> String {
        format!(
            "Rollback condition met: {} (observed mean {:.3} over {} samples)",
            self.condition, self.observed, self.samples
        )
    }
}

/// Evaluates an experiment's rollback conditions against recorded results
#[derive(Debug, Clone, Copy)]
pub struct RollbackMonitor {
    epsilon: f64,
}

impl RollbackMonitor {
    /// `epsilon` is the tolerance of the `==` and `!=` operators
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// Return the first condition, in config order, whose windowed mean crosses its threshold.
    ///
    /// A condition with no results inside its window cannot be evaluated and is skipped.
    pub fn evaluate<'a>(
        &self,
        config: &ExperimentConfig,
        results: impl IntoIterator<Item = &'a ExperimentResult> + Clone,
        now: DateTime<Utc>,
    ) -> Option<TriggeredCondition> {
        config.rollback_conditions().iter().find_map(|condition| {
            let (observed, samples) = Self::window_mean(condition, results.clone(), now)?;

            condition
                .operator
                .compare(observed, condition.threshold, self.epsilon)
                .then(|| TriggeredCondition {
                    condition: condition.clone(),
                    observed,
                    samples,
                })
        })
    }

    /// Mean of the condition's metric over results recorded within its window
    fn window_mean<'a>(
        condition: &RollbackCondition,
        results: impl IntoIterator<Item = &'a ExperimentResult>,
        now: DateTime<Utc>,
    ) -> Option<(f64, usize)> {
        let window = chrono::Duration::from_std(condition.window).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let (sum, count) = results
            .into_iter()
            .filter(|result| result.recorded_at >= cutoff && result.recorded_at <= now)
            .filter_map(|result| result.raw.value(condition.metric))
            .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));

        (count > 0).then(|| (sum / count as f64, count))
    }
}

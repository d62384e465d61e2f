//! Memoized user-to-variant assignments

use std::collections::HashMap;

use super::entity::{ExperimentId, VariantName};

/// Sticky assignments keyed by user, then experiment
#[derive(Debug, Clone, Default)]
pub struct UserAssignments {
    by_user: HashMap<String, HashMap<ExperimentId, VariantName>>,
}

impl UserAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previously assigned variant for this pair, if any
    pub fn get(&self, user_id: &str, experiment_id: &ExperimentId) -> Option<VariantName> {
        self.by_user
            .get(user_id)
            .and_then(|experiments| experiments.get(experiment_id))
            .copied()
    }

    /// Remember an assignment. Returns the previous one if the pair was already assigned.
    pub fn insert(
        &mut self,
        user_id: impl Into<String>,
        experiment_id: ExperimentId,
        variant: VariantName,
    ) -> Option<VariantName> {
        self.by_user
            .entry(user_id.into())
            .or_default()
            .insert(experiment_id, variant)
    }

    /// Drop every user's entry for one experiment. Returns how many were removed.
    pub fn purge_experiment(&mut self, experiment_id: &ExperimentId) -> usize {
        let mut removed = 0;

        self.by_user.retain(|_, experiments| {
            if experiments.remove(experiment_id).is_some() {
                removed += 1;
            }
            !experiments.is_empty()
        });

        removed
    }

    /// Number of users assigned to an experiment
    pub fn count_for(&self, experiment_id: &ExperimentId) -> usize {
        self.by_user
            .values()
            .filter(|experiments| experiments.contains_key(experiment_id))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_user.clear();
    }
}

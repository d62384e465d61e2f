//! Storage port for experiments and recorded results

use async_trait::async_trait;
use std::fmt::Debug;

use super::entity::{ExperimentConfig, ExperimentId};
use super::record::ExperimentResult;
use super::state::ExperimentState;
use crate::domain::DomainError;

/// Best-effort persistence used by the experiment service.
///
/// The service never waits on these calls in its hot paths; failures are logged and
/// swallowed, so implementations may simply return errors.
#[async_trait]
pub trait ExperimentStore: Send + Sync + Debug {
    /// Load every stored experiment definition
    async fn load(&self) -> Result<Vec<ExperimentConfig>, DomainError>;

    /// Persist the current state snapshot of an experiment
    async fn save(&self, state: &ExperimentState) -> Result<(), DomainError>;

    /// Append one recorded result
    async fn save_result(
        &self,
        experiment_id: &ExperimentId,
        result: &ExperimentResult,
    ) -> Result<(), DomainError>;
}

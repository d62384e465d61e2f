//! In-memory implementation of the experiment store

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::domain::experiment::{
    ExperimentConfig, ExperimentId, ExperimentResult, ExperimentState, ExperimentStore,
};
use crate::domain::DomainError;

/// In-memory experiment store implementation
#[derive(Debug)]
pub struct InMemoryExperimentStore {
    configs: RwLock<BTreeMap<ExperimentId, ExperimentConfig>>,
    states: RwLock<HashMap<ExperimentId, ExperimentState>>,
    results: RwLock<HashMap<ExperimentId, Vec<ExperimentResult>>>,
}

impl InMemoryExperimentStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(BTreeMap::new()),
            states: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store preloaded with experiment definitions
    pub fn with_configs(configs: Vec<ExperimentConfig>) -> Self {
        let configs = configs
            .into_iter()
            .map(|config| (config.id().clone(), config))
            .collect();

        Self {
            configs: RwLock::new(configs),
            ..Self::new()
        }
    }

    /// Last saved state of an experiment
    pub fn state(&self, id: &ExperimentId) -> Result<Option<ExperimentState>, DomainError> {
        let states = self
            .states
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(states.get(id).cloned())
    }

    /// All results saved for an experiment, in save order
    pub fn results(&self, id: &ExperimentId) -> Result<Vec<ExperimentResult>, DomainError> {
        let results = self
            .results
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(results.get(id).cloned().unwrap_or_default())
    }
}

impl Default for InMemoryExperimentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExperimentStore for InMemoryExperimentStore {
    async fn load(&self) -> Result<Vec<ExperimentConfig>, DomainError> {
        let configs = self
            .configs
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(configs.values().cloned().collect())
    }

    async fn save(&self, state: &ExperimentState) -> Result<(), DomainError> {
        let id = state.config().id().clone();

        self.configs
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?
            .insert(id.clone(), state.config().clone());

        self.states
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?
            .insert(id, state.clone());

        Ok(())
    }

    async fn save_result(
        &self,
        experiment_id: &ExperimentId,
        result: &ExperimentResult,
    ) -> Result<(), DomainError> {
        let mut results = self
            .results
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        results
            .entry(experiment_id.clone())
            .or_default()
            .push(result.clone());

        Ok(())
    }
}

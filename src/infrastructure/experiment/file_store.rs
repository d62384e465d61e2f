//! JSON-file implementation of the experiment store
//!
//! Layout under the root directory:
//! - `experiments/<id>.json` holds the latest state snapshot (config included)
//! - `results/<id>.jsonl` holds one recorded result per line, append-only

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::experiment::{
    ExperimentConfig, ExperimentId, ExperimentResult, ExperimentState, ExperimentStore,
};
use crate::domain::DomainError;

const EXPERIMENTS_DIR: &str = "experiments";
const RESULTS_DIR: &str = "results";

/// File-backed experiment store
#[derive(Debug, Clone)]
pub struct FileExperimentStore {
    root: PathBuf,
}

impl FileExperimentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, id: &ExperimentId) -> PathBuf {
        self.root
            .join(EXPERIMENTS_DIR)
            .join(format!("{}.json", id.as_str()))
    }

    fn temp_path(&self, id: &ExperimentId) -> PathBuf {
        self.root
            .join(EXPERIMENTS_DIR)
            .join(format!("{}.{}.json.tmp", id.as_str(), Uuid::new_v4()))
    }

    fn results_path(&self, id: &ExperimentId) -> PathBuf {
        self.root
            .join(RESULTS_DIR)
            .join(format!("{}.jsonl", id.as_str()))
    }

    /// Read back every result saved for an experiment
    pub async fn load_results(
        &self,
        id: &ExperimentId,
    ) -> Result<Vec<ExperimentResult>, DomainError> {
        let path = self.results_path(id);

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path, e)),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    DomainError::storage(format!("Invalid result in {}: {}", path.display(), e))
                })
            })
            .collect()
    }
}

fn io_error(path: &Path, error: std::io::Error) -> DomainError {
    DomainError::storage(format!("{}: {}", path.display(), error))
}

async fn ensure_parent(path: &Path) -> Result<(), DomainError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    Ok(())
}

#[async_trait]
impl ExperimentStore for FileExperimentStore {
    async fn load(&self) -> Result<Vec<ExperimentConfig>, DomainError> {
        let dir = self.root.join(EXPERIMENTS_DIR);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut configs = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path();

            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_error(&path, e))?;

            match serde_json::from_str::<ExperimentState>(&contents) {
                Ok(state) => configs.push(state.config().clone()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable experiment file");
                }
            }
        }

        configs.sort_by(|a, b| a.id().cmp(b.id()));
        debug!(count = configs.len(), root = %self.root.display(), "Loaded experiment configs");

        Ok(configs)
    }

    async fn save(&self, state: &ExperimentState) -> Result<(), DomainError> {
        let path = self.state_path(state.config().id());
        ensure_parent(&path).await?;

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| DomainError::internal(format!("Failed to serialize state: {}", e)))?;

        // Write then rename so readers never see a torn file. Saves for the same
        // experiment can overlap, so each one gets its own temp file.
        let tmp = self.temp_path(state.config().id());
        if let Err(e) = tokio::fs::write(&tmp, json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(&tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(&path, e));
        }

        Ok(())
    }

    async fn save_result(
        &self,
        experiment_id: &ExperimentId,
        result: &ExperimentResult,
    ) -> Result<(), DomainError> {
        let path = self.results_path(experiment_id);
        ensure_parent(&path).await?;

        let mut line = serde_json::to_vec(result)
            .map_err(|e| DomainError::internal(format!("Failed to serialize result: {}", e)))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        file.write_all(&line).await.map_err(|e| io_error(&path, e))?;
        file.flush().await.map_err(|e| io_error(&path, e))?;

        Ok(())
    }
}

//! CLI module for the audio experiment engine
//!
//! Provides subcommands for working with experiment definitions offline:
//! - `validate`: check an experiment definition file
//! - `simulate`: run a definition against synthetic users and print the analysis

pub mod simulate;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::domain::experiment::ExperimentConfig;

/// Audio experiments - A/B testing and controlled rollout of audio-engine optimizations
#[derive(Parser)]
#[command(name = "audio-experiments")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate an experiment definition (JSON)
    Validate(validate::ValidateArgs),

    /// Simulate an experiment with synthetic users and metrics
    Simulate(simulate::SimulateArgs),
}

/// Read and parse an experiment definition file
pub(crate) fn read_experiment(path: &Path) -> anyhow::Result<ExperimentConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse experiment definition {}", path.display()))
}

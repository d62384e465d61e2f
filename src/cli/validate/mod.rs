//! Validate command - checks an experiment definition without running it

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::config::AppConfig;
use crate::domain::experiment::{validate_experiment_config, ExperimentConfig};
use crate::infrastructure::logging::init_logging;

/// Arguments for the validate command
#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Path to the experiment definition (JSON)
    pub file: PathBuf,
}

/// Run the validate command
pub async fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let config = AppConfig::load().unwrap_or_default();
    init_logging(&config.logging);

    let experiment = super::read_experiment(&args.file)?;

    validate_experiment_config(&experiment, config.engine.max_duration())
        .map_err(|e| anyhow::anyhow!("Invalid experiment '{}': {}", experiment.id(), e))?;

    info!(experiment_id = %experiment.id(), "Experiment definition is valid");
    println!("{}", summarize(&experiment));

    Ok(())
}

fn summarize(experiment: &ExperimentConfig) -> String {
    let arms: Vec<String> = experiment
        .variants()
        .iter()
        .zip(experiment.traffic_split())
        .map(|(variant, percent)| format!("{} {}%", variant.name(), percent))
        .collect();

    format!(
        "{} is valid: {} [{}], primary metric {}, {}h",
        experiment.id(),
        experiment.name(),
        arms.join(", "),
        experiment.primary_metric(),
        experiment.duration().as_secs() / 3600
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{ExperimentId, Variant, VariantName};
    use std::time::Duration;

    #[test]
    fn test_summarize() {
        let experiment = ExperimentConfig::new(ExperimentId::new("buffer-256").unwrap(), "Buffer")
            .with_variant(Variant::new(VariantName::Control), 50.0)
            .with_variant(Variant::new(VariantName::VariantA), 50.0)
            .with_duration(Duration::from_secs(48 * 3600));

        assert_eq!(
            summarize(&experiment),
            "buffer-256 is valid: Buffer [control 50%, variant_a 50%], primary metric latency, 48h"
        );
    }
}

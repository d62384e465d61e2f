//! Simulate command - runs an experiment against synthetic users
//!
//! Each simulated user is assigned through the engine and reports a number of
//! sessions whose metrics follow a simple model of the variant's optimization config.
//! The run is reproducible for a given seed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::config::{AppConfig, EngineConfig};
use crate::domain::experiment::{
    ExperimentAnalysis, ExperimentConfig, ExperimentStatus, OptimizationConfig,
    PerformanceMetrics, QualityLevel, VariantName,
};
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::observability::init_metrics;
use crate::infrastructure::services::ExperimentService;

/// Buffer size the latency model treats as neutral
const REFERENCE_BUFFER_FRAMES: f64 = 512.0;

/// Arguments for the simulate command
#[derive(Args, Clone)]
pub struct SimulateArgs {
    /// Path to the experiment definition (JSON)
    pub file: PathBuf,

    /// Number of synthetic users
    #[arg(long, default_value_t = 1000)]
    pub users: usize,

    /// Sessions reported per assigned user
    #[arg(long, default_value_t = 3)]
    pub sessions: usize,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Print Prometheus metrics after the report
    #[arg(long)]
    pub metrics: bool,
}

/// Outcome of a simulation run
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub users: usize,
    pub assigned: usize,
    pub status: ExperimentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
    /// Samples still held in each variant's live buffer
    pub buffered: BTreeMap<VariantName, usize>,
    pub analysis: ExperimentAnalysis,
}

/// Run the simulate command
pub async fn run(args: SimulateArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::load().unwrap_or_default();
    init_logging(&config.logging);

    if args.metrics {
        config.metrics.enabled = true;
    }
    let metrics = init_metrics(&config.metrics);

    let experiment = super::read_experiment(&args.file)?;
    let report = simulate(config.engine, experiment, &args)?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(metrics) = metrics {
        println!("{}", metrics.render());
    }

    Ok(())
}

/// Create, start and end the experiment with synthetic traffic in between
pub fn simulate(
    engine: EngineConfig,
    experiment: ExperimentConfig,
    args: &SimulateArgs,
) -> anyhow::Result<SimulationReport> {
    let service = ExperimentService::new(engine)?;
    let id = experiment.id().to_string();

    service.create_experiment(experiment)?;
    service.start_experiment(&id)?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut assigned = 0;

    for user in 0..args.users {
        let user_id = format!("sim-user-{}", user);

        let Some(variant) = service.get_variant_for_user(&id, &user_id) else {
            continue;
        };
        assigned += 1;

        for session in 0..args.sessions {
            let sample = synthetic_sample(&mut rng, variant.config());
            let session_id = format!("{}-session-{}", user_id, session);

            service.record_metrics(&id, variant.name(), sample, &session_id, Some(&user_id));
        }
    }

    info!(experiment_id = %id, users = args.users, assigned, "Simulated traffic recorded");

    let status = service.get_experiment_status(&id);
    if status.is_some_and(|s| s.is_running()) {
        service.end_experiment(&id)?;
    }

    let state = service
        .get_experiment_state(&id)
        .ok_or_else(|| anyhow::anyhow!("Experiment '{}' disappeared during simulation", id))?;

    let analysis = match state.last_analysis() {
        Some(analysis) => analysis.clone(),
        None => service.analyze_experiment(&id)?,
    };

    let buffered = state
        .config()
        .variants()
        .iter()
        .map(|variant| (variant.name(), state.variant_buffer(variant.name()).count()))
        .collect();

    service.dispose();

    Ok(SimulationReport {
        users: args.users,
        assigned,
        status: state.status(),
        rollback_reason: state.rollback_reason().map(str::to_string),
        buffered,
        analysis,
    })
}

/// One session's metrics. Larger buffers lower CPU and dropouts but add latency;
/// higher quality tiers cost CPU and improve audio quality.
fn synthetic_sample(rng: &mut StdRng, config: &OptimizationConfig) -> PerformanceMetrics {
    let buffer_factor = config
        .buffer_size
        .map(|frames| (f64::from(frames) / REFERENCE_BUFFER_FRAMES).clamp(0.25, 4.0))
        .unwrap_or(1.0);

    let (quality_cpu, quality_score) = match config.quality {
        Some(QualityLevel::Low) => (0.8, 70.0),
        Some(QualityLevel::Medium) | None => (1.0, 80.0),
        Some(QualityLevel::High) => (1.2, 88.0),
        Some(QualityLevel::Ultra) => (1.5, 93.0),
    };

    let latency = rng.gen_range(15.0..35.0) * buffer_factor.sqrt();
    let cpu = (rng.gen_range(25.0..55.0) * quality_cpu / buffer_factor.sqrt()).min(100.0);
    let memory = rng.gen_range(700.0..1100.0) * buffer_factor.max(1.0).sqrt();
    let max_dropouts = (4.0 / buffer_factor).ceil().max(1.0) as u32;

    PerformanceMetrics::new(latency, cpu, memory, rng.gen_range(0..max_dropouts))
        .with_audio_quality(quality_score + rng.gen_range(-5.0..5.0))
        .with_error_rate(rng.gen_range(0.0..2.0))
}

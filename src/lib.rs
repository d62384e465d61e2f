//! Audio Experiments
//!
//! An experimentation and controlled-rollout engine for audio-performance optimizations:
//! - Deterministic, sticky assignment of users to variants with targeting and exposure gating
//! - Bounded recording of per-session performance metrics
//! - Rollback conditions evaluated on every sample and on a timer
//! - Per-variant analysis with significance, winner selection, risk and recommendations
//! - Best-effort persistence through a pluggable store

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use infrastructure::services::ExperimentService;

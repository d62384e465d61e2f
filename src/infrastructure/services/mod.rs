//! Infrastructure services

mod analysis;
mod assignment;
mod experiment_service;
mod rollback_monitor;
mod scheduler;

pub use analysis::AnalysisEngine;
pub use assignment::{AssignmentEngine, Ineligibility};
pub use experiment_service::{ExperimentService, ExperimentServiceBuilder};
pub use rollback_monitor::{RollbackMonitor, TriggeredCondition};
pub use scheduler::Scheduler;

//! Experiment service for audio-performance A/B testing
//!
//! Owns the experiment registry and wires assignment, metric recording, rollback
//! monitoring, analysis and scheduling together. The service is cheap to clone;
//! clones share the same state.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::analysis::AnalysisEngine;
use super::assignment::AssignmentEngine;
use super::rollback_monitor::RollbackMonitor;
use super::scheduler::Scheduler;
use crate::config::EngineConfig;
use crate::domain::experiment::{
    validate_experiment_config, DeviceInfoProvider, ExperimentAnalysis, ExperimentConfig,
    ExperimentId, ExperimentResult, ExperimentState, ExperimentStatus, ExperimentStore,
    OptimizationConfig, PerformanceMetrics, UserAssignments, Variant, VariantName,
};
use crate::domain::DomainError;
use crate::infrastructure::observability::{
    record_analysis_duration, record_assignment, record_result, record_rollback,
    record_transition, RollbackReason,
};

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ExperimentService`]
#[derive(Debug)]
pub struct ExperimentServiceBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn ExperimentStore>>,
    device_provider: Option<Arc<dyn DeviceInfoProvider>>,
}

impl ExperimentServiceBuilder {
    /// Persist experiments and results through `store` (best effort)
    pub fn with_store(mut self, store: Arc<dyn ExperimentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Supply device info for device-targeted experiments
    pub fn with_device_provider(mut self, provider: Arc<dyn DeviceInfoProvider>) -> Self {
        self.device_provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<ExperimentService, DomainError> {
        self.config.validate()?;

        let analysis = AnalysisEngine::new(
            self.config.significance_method,
            self.config.confidence_level,
            self.config.error_rate_risk_threshold,
        );
        let monitor = RollbackMonitor::new(self.config.equality_epsilon);

        Ok(ExperimentService {
            inner: Arc::new(ServiceInner {
                config: self.config,
                state: Mutex::new(EngineState::default()),
                store: self.store,
                assignment: AssignmentEngine::new(self.device_provider),
                analysis,
                monitor,
                scheduler: Scheduler::new(),
            }),
        })
    }
}

// ============================================================================
// Experiment Service
// ============================================================================

/// Service for running audio-performance experiments
#[derive(Debug, Clone)]
pub struct ExperimentService {
    inner: Arc<ServiceInner>,
}

#[derive(Debug)]
struct ServiceInner {
    config: EngineConfig,
    state: Mutex<EngineState>,
    store: Option<Arc<dyn ExperimentStore>>,
    assignment: AssignmentEngine,
    analysis: AnalysisEngine,
    monitor: RollbackMonitor,
    scheduler: Scheduler,
}

#[derive(Debug, Default)]
struct EngineState {
    experiments: HashMap<ExperimentId, ExperimentState>,
    assignments: UserAssignments,
}

impl ExperimentService {
    /// Create a service without storage or device info
    pub fn new(config: EngineConfig) -> Result<Self, DomainError> {
        Self::builder(config).build()
    }

    pub fn builder(config: EngineConfig) -> ExperimentServiceBuilder {
        ExperimentServiceBuilder {
            config,
            store: None,
            device_provider: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Validate and register a new experiment in `draft`
    pub fn create_experiment(&self, config: ExperimentConfig) -> Result<(), DomainError> {
        debug!(experiment_id = %config.id(), "Creating experiment");

        let snapshot = self.inner.register(config)?;
        let id = snapshot.config().id();

        record_transition(id, ExperimentStatus::Draft);
        info!(
            experiment_id = %id,
            variants = snapshot.config().variants().len(),
            duration_secs = snapshot.config().duration().as_secs(),
            "Experiment created"
        );

        self.inner.persist(snapshot);
        Ok(())
    }

    /// Start a `draft` experiment or resume a `paused` one
    pub fn start_experiment(&self, id: &str) -> Result<(), DomainError> {
        let id = parse_id(id)?;
        self.inner.start(&id)
    }

    /// Pause a running experiment. Timers are cancelled and re-armed on start.
    pub fn pause_experiment(&self, id: &str) -> Result<(), DomainError> {
        let id = parse_id(id)?;
        self.inner.pause(&id)
    }

    /// Complete an experiment and compute its final analysis. Rolls back when the
    /// analysis recommends it. Safe to call again on a finished experiment.
    pub fn end_experiment(&self, id: &str) -> Result<(), DomainError> {
        let id = parse_id(id)?;
        self.inner.end(&id)
    }

    /// Roll back an experiment and purge all of its assignments
    pub fn rollback_experiment(&self, id: &str) -> Result<(), DomainError> {
        let id = parse_id(id)?;
        self.inner.rollback(&id, "Manual rollback", RollbackReason::Manual)
    }

    /// Mark a running or paused experiment as failed, e.g. after an audio engine fault
    pub fn fail_experiment(&self, id: &str, reason: &str) -> Result<(), DomainError> {
        let id = parse_id(id)?;
        self.inner.fail(&id, reason)
    }

    // ========================================================================
    // Assignment and recording
    // ========================================================================

    /// Variant for a user, or `None` when the experiment is unknown, not running, or
    /// the user is not eligible. Assignments are sticky while the experiment runs.
    pub fn get_variant_for_user(&self, experiment_id: &str, user_id: &str) -> Option<Variant> {
        let id = ExperimentId::new(experiment_id).ok()?;
        self.inner.variant_for_user(&id, user_id)
    }

    /// Optimization settings the audio engine should apply for a variant
    pub fn apply_variant_config(
        &self,
        experiment_id: &str,
        variant: VariantName,
    ) -> Result<OptimizationConfig, DomainError> {
        let id = parse_id(experiment_id)?;
        let engine = self.inner.lock();

        let state = engine
            .experiments
            .get(&id)
            .ok_or_else(|| not_found(&id))?;

        state
            .config()
            .variant(variant)
            .map(|v| v.config().clone())
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "Variant '{}' not found in experiment '{}'",
                    variant, id
                ))
            })
    }

    /// Record a performance sample. Ignored unless the experiment is running.
    pub fn record_metrics(
        &self,
        experiment_id: &str,
        variant: VariantName,
        metrics: PerformanceMetrics,
        session_id: &str,
        user_id: Option<&str>,
    ) {
        let Ok(id) = ExperimentId::new(experiment_id) else {
            return;
        };
        self.inner.record(&id, variant, metrics, session_id, user_id);
    }

    // ========================================================================
    // Monitoring and analysis
    // ========================================================================

    /// Evaluate rollback conditions now. Returns whether this call rolled the experiment back.
    pub fn check_rollback_conditions(&self, id: &str) -> Result<bool, DomainError> {
        let id = parse_id(id)?;
        self.inner.check_rollback(&id)
    }

    /// Compute a fresh analysis from the current results
    pub fn analyze_experiment(&self, id: &str) -> Result<ExperimentAnalysis, DomainError> {
        let id = parse_id(id)?;
        let mut engine = self.inner.lock();

        let state = engine
            .experiments
            .get_mut(&id)
            .ok_or_else(|| not_found(&id))?;

        Ok(self.inner.analyze_state(state))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Configs of all running experiments, ordered by id
    pub fn get_active_experiments(&self) -> Vec<ExperimentConfig> {
        let engine = self.inner.lock();

        let mut active: Vec<ExperimentConfig> = engine
            .experiments
            .values()
            .filter(|state| state.status().is_running())
            .map(|state| state.config().clone())
            .collect();

        active.sort_by(|a, b| a.id().cmp(b.id()));
        active
    }

    pub fn get_experiment_status(&self, id: &str) -> Option<ExperimentStatus> {
        let id = ExperimentId::new(id).ok()?;
        self.inner.lock().experiments.get(&id).map(|s| s.status())
    }

    /// Full copy of an experiment's runtime state, results included
    pub fn get_experiment_state(&self, id: &str) -> Option<ExperimentState> {
        let id = ExperimentId::new(id).ok()?;
        self.inner.lock().experiments.get(&id).cloned()
    }

    /// Most recent analysis, from `analyze_experiment`, the periodic task, or `end_experiment`
    pub fn get_last_analysis(&self, id: &str) -> Option<ExperimentAnalysis> {
        let id = ExperimentId::new(id).ok()?;
        self.inner
            .lock()
            .experiments
            .get(&id)
            .and_then(|s| s.last_analysis().cloned())
    }

    // ========================================================================
    // Storage and shutdown
    // ========================================================================

    /// Register every valid stored experiment as a fresh draft. Returns how many were added.
    ///
    /// Load failures and invalid definitions are logged and skipped.
    pub async fn restore_from_storage(&self) -> usize {
        let Some(store) = self.inner.store.clone() else {
            return 0;
        };

        let configs = match store.load().await {
            Ok(configs) => configs,
            Err(e) => {
                warn!(error = %e, "Failed to load experiments from storage");
                return 0;
            }
        };

        let mut restored = 0;

        for config in configs {
            let id = config.id().clone();

            match self.inner.register(config) {
                Ok(_) => restored += 1,
                Err(e) => warn!(experiment_id = %id, error = %e, "Skipping stored experiment"),
            }
        }

        info!(restored, "Restored experiments from storage");
        restored
    }

    /// Cancel every timer and drop all experiments and assignments
    pub fn dispose(&self) {
        self.inner.scheduler.cancel_all();

        let mut engine = self.inner.lock();
        let count = engine.experiments.len();
        engine.experiments.clear();
        engine.assignments.clear();

        info!(experiments = count, "Experiment service disposed");
    }
}

// ============================================================================
// Internals
// ============================================================================

impl ServiceInner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, config: ExperimentConfig) -> Result<ExperimentState, DomainError> {
        validate_experiment_config(&config, self.config.max_duration())
            .map_err(|e| DomainError::validation(e.to_string()))?;

        let mut engine = self.lock();

        if engine.experiments.contains_key(config.id()) {
            return Err(DomainError::validation(format!(
                "Experiment '{}' already exists",
                config.id()
            )));
        }

        let state = ExperimentState::new(config);
        let snapshot = state.snapshot();
        engine
            .experiments
            .insert(state.config().id().clone(), state);

        Ok(snapshot)
    }

    fn start(self: &Arc<Self>, id: &ExperimentId) -> Result<(), DomainError> {
        let snapshot = {
            let mut engine = self.lock();
            let state = engine.experiments.get_mut(id).ok_or_else(|| not_found(id))?;

            let now = Utc::now();
            state.start(now)?;
            let remaining = state.remaining(now);

            // Armed under the lock so a concurrent end or rollback cannot miss them
            self.arm_timers(id, remaining);
            state.snapshot()
        };

        self.ensure_analysis_task();

        record_transition(id, ExperimentStatus::Running);
        info!(
            experiment_id = %id,
            remaining_secs = snapshot.remaining(Utc::now()).as_secs(),
            "Experiment started"
        );

        self.persist(snapshot);
        Ok(())
    }

    fn pause(&self, id: &ExperimentId) -> Result<(), DomainError> {
        let snapshot = {
            let mut engine = self.lock();
            let state = engine.experiments.get_mut(id).ok_or_else(|| not_found(id))?;

            state.pause(Utc::now())?;
            self.scheduler.cancel_experiment(id);
            state.snapshot()
        };

        record_transition(id, ExperimentStatus::Paused);
        info!(experiment_id = %id, "Experiment paused");

        self.persist(snapshot);
        Ok(())
    }

    fn end(&self, id: &ExperimentId) -> Result<(), DomainError> {
        let mut engine = self.lock();
        let state = engine.experiments.get_mut(id).ok_or_else(|| not_found(id))?;

        let newly_ended = !state.status().is_terminal();
        if newly_ended {
            state.complete(Utc::now())?;
        }

        let analysis = self.analyze_state(state);
        let can_roll_back = state.status().can_transition_to(ExperimentStatus::RolledBack);
        let snapshot = state.snapshot();

        self.scheduler.cancel_experiment(id);
        let purged = engine.assignments.purge_experiment(id);

        if newly_ended {
            record_transition(id, ExperimentStatus::Completed);
            info!(
                experiment_id = %id,
                total_samples = analysis.total_samples,
                winner = ?analysis.winning_variant,
                purged_assignments = purged,
                "Experiment ended"
            );
        } else {
            debug!(experiment_id = %id, status = %snapshot.status(), "Recomputed final analysis");
        }

        if analysis.recommends_rollback() && can_roll_back {
            let reason = format!(
                "Final analysis recommends rollback: {}",
                analysis.risk.factors.join("; ")
            );
            return self.roll_back_locked(&mut engine, id, reason, RollbackReason::Analysis);
        }

        self.persist(snapshot);
        Ok(())
    }

    fn rollback(&self, id: &ExperimentId, reason: &str, kind: RollbackReason) -> Result<(), DomainError> {
        let mut engine = self.lock();
        let state = engine.experiments.get(id).ok_or_else(|| not_found(id))?;

        if state.status() == ExperimentStatus::RolledBack {
            debug!(experiment_id = %id, "Experiment already rolled back");
            return Ok(());
        }

        self.roll_back_locked(&mut engine, id, reason.to_string(), kind)
    }

    /// Roll back while the caller holds the state lock, so the next caller sees it
    fn roll_back_locked(
        &self,
        engine: &mut EngineState,
        id: &ExperimentId,
        reason: String,
        kind: RollbackReason,
    ) -> Result<(), DomainError> {
        let state = engine.experiments.get_mut(id).ok_or_else(|| not_found(id))?;

        state.roll_back(reason.clone(), Utc::now())?;
        let snapshot = state.snapshot();

        self.scheduler.cancel_experiment(id);
        let purged = engine.assignments.purge_experiment(id);

        record_rollback(id, kind);
        record_transition(id, ExperimentStatus::RolledBack);
        warn!(
            experiment_id = %id,
            reason = %reason,
            trigger = kind.as_str(),
            purged_assignments = purged,
            "Experiment rolled back"
        );

        self.persist(snapshot);
        Ok(())
    }

    fn fail(&self, id: &ExperimentId, reason: &str) -> Result<(), DomainError> {
        let snapshot = {
            let mut engine = self.lock();
            let state = engine.experiments.get_mut(id).ok_or_else(|| not_found(id))?;

            state.fail(reason, Utc::now())?;
            let snapshot = state.snapshot();

            self.scheduler.cancel_experiment(id);
            engine.assignments.purge_experiment(id);
            snapshot
        };

        record_transition(id, ExperimentStatus::Failed);
        warn!(experiment_id = %id, reason = %reason, "Experiment failed");

        self.persist(snapshot);
        Ok(())
    }

    fn variant_for_user(&self, id: &ExperimentId, user_id: &str) -> Option<Variant> {
        let mut engine = self.lock();
        let EngineState {
            experiments,
            assignments,
        } = &mut *engine;

        let state = experiments.get_mut(id)?;

        if !state.status().is_running() {
            return None;
        }

        if let Some(variant) = assignments.get(user_id, id) {
            return state.config().variant(variant).cloned();
        }

        if let Err(reason) = self.assignment.check_eligibility(state.config(), user_id) {
            debug!(experiment_id = %id, user_id = %user_id, reason = ?reason, "User not eligible");
            return None;
        }

        let variant = AssignmentEngine::select_variant(state.config(), user_id);
        assignments.insert(user_id, id.clone(), variant);
        state.record_participant();

        record_assignment(id, variant);
        debug!(experiment_id = %id, user_id = %user_id, variant = %variant, "Assigned variant");

        state.config().variant(variant).cloned()
    }

    fn record(
        &self,
        id: &ExperimentId,
        variant: VariantName,
        metrics: PerformanceMetrics,
        session_id: &str,
        user_id: Option<&str>,
    ) {
        let mut engine = self.lock();

        let Some(state) = engine.experiments.get_mut(id) else {
            debug!(experiment_id = %id, "Ignoring metrics for unknown experiment");
            return;
        };

        if !state.status().is_running() {
            debug!(experiment_id = %id, status = %state.status(), "Ignoring metrics for inactive experiment");
            return;
        }

        if state.config().variant(variant).is_none() {
            warn!(experiment_id = %id, variant = %variant, "Ignoring metrics for unknown variant");
            return;
        }

        let mut result = ExperimentResult::new(id.clone(), variant, metrics, session_id);

        if let Some(user_id) = user_id {
            result = result.with_user_id(user_id);

            if let Some(device) = self
                .assignment
                .device_provider()
                .and_then(|provider| provider.device_info(user_id))
            {
                result = result.with_device_info(device);
            }
        }

        state.push_result(
            result.clone(),
            self.config.max_results_per_experiment,
            self.config.max_buffered_results_per_variant,
        );

        record_result(id, variant);
        debug!(experiment_id = %id, variant = %variant, session_id = %session_id, "Recorded metrics");

        let triggered = self
            .monitor
            .evaluate(state.config(), state.results(), Utc::now());

        if let Some(triggered) = triggered {
            if let Err(e) =
                self.roll_back_locked(&mut engine, id, triggered.reason(), RollbackReason::Condition)
            {
                warn!(experiment_id = %id, error = %e, "Rollback after recording failed");
            }
        }

        drop(engine);
        self.persist_result(id, result);
    }

    fn check_rollback(&self, id: &ExperimentId) -> Result<bool, DomainError> {
        let mut engine = self.lock();
        let state = engine.experiments.get(id).ok_or_else(|| not_found(id))?;

        if !state.status().is_running() {
            return Ok(false);
        }

        match self
            .monitor
            .evaluate(state.config(), state.results(), Utc::now())
        {
            Some(triggered) => {
                self.roll_back_locked(&mut engine, id, triggered.reason(), RollbackReason::Condition)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn analyze_state(&self, state: &mut ExperimentState) -> ExperimentAnalysis {
        let started = Instant::now();
        let analysis = self.analysis.analyze(state, Utc::now());
        record_analysis_duration(state.config().id(), started.elapsed());

        state.set_last_analysis(analysis.clone());
        analysis
    }

    fn run_periodic_analysis(&self) {
        let mut engine = self.lock();
        let mut analyzed = 0;

        for state in engine
            .experiments
            .values_mut()
            .filter(|state| state.status().is_running())
        {
            let analysis = self.analyze_state(state);
            analyzed += 1;

            let buffered: Vec<(VariantName, usize)> = state
                .config()
                .variants()
                .iter()
                .map(|variant| (variant.name(), state.variant_buffer(variant.name()).count()))
                .collect();
            debug!(
                experiment_id = %analysis.experiment_id,
                total_samples = analysis.total_samples,
                buffered = ?buffered,
                "Live analysis"
            );

            if analysis.recommends_rollback() {
                warn!(
                    experiment_id = %analysis.experiment_id,
                    factors = ?analysis.risk.factors,
                    "Live analysis recommends rollback"
                );
            }
        }

        debug!(experiments = analyzed, "Periodic analysis complete");
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn arm_timers(self: &Arc<Self>, id: &ExperimentId, remaining: Duration) {
        let on_end = {
            let weak = Arc::downgrade(self);
            let id = id.clone();

            move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };

                info!(experiment_id = %id, "Experiment duration elapsed");
                if let Err(e) = inner.end(&id) {
                    warn!(experiment_id = %id, error = %e, "Automatic end failed");
                }
            }
        };

        let on_check = {
            let weak: Weak<Self> = Arc::downgrade(self);
            let id = id.clone();

            move || match weak.upgrade().map(|inner| inner.check_rollback(&id)) {
                Some(Ok(false)) => ControlFlow::Continue(()),
                Some(Ok(true)) | Some(Err(_)) | None => ControlFlow::Break(()),
            }
        };

        self.scheduler.arm_experiment(
            id,
            remaining,
            self.config.rollback_check_interval(),
            on_end,
            on_check,
        );
    }

    fn ensure_analysis_task(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);

        self.scheduler
            .ensure_analysis_task(self.config.analysis_interval(), move || {
                match weak.upgrade() {
                    Some(inner) => {
                        inner.run_periodic_analysis();
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            });
    }

    // ========================================================================
    // Persistence (fire-and-forget)
    // ========================================================================

    fn persist(&self, state: ExperimentState) {
        let Some(store) = self.store.clone() else {
            return;
        };

        let Ok(handle) = Handle::try_current() else {
            debug!(experiment_id = %state.config().id(), "No async runtime, skipping persistence");
            return;
        };

        handle.spawn(async move {
            if let Err(e) = store.save(&state).await {
                warn!(
                    experiment_id = %state.config().id(),
                    error = %e,
                    "Failed to persist experiment state"
                );
            }
        });
    }

    fn persist_result(&self, id: &ExperimentId, result: ExperimentResult) {
        let Some(store) = self.store.clone() else {
            return;
        };

        let Ok(handle) = Handle::try_current() else {
            debug!(experiment_id = %id, "No async runtime, skipping result persistence");
            return;
        };

        let id = id.clone();
        handle.spawn(async move {
            if let Err(e) = store.save_result(&id, &result).await {
                warn!(experiment_id = %id, error = %e, "Failed to persist experiment result");
            }
        });
    }
}

fn parse_id(id: &str) -> Result<ExperimentId, DomainError> {
    ExperimentId::new(id)
        .map_err(|_| DomainError::not_found(format!("Experiment '{}' not found", id)))
}

fn not_found(id: &ExperimentId) -> DomainError {
    DomainError::not_found(format!("Experiment '{}' not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{
        ComparisonOperator, DeviceTargeting, MetricKey, MockExperimentStore, RollbackCondition,
    };

    fn create_service() -> ExperimentService {
        ExperimentService::new(EngineConfig::default()).unwrap()
    }

    fn create_service_with_store(store: Arc<MockExperimentStore>) -> ExperimentService {
        ExperimentService::builder(EngineConfig::default())
            .with_store(store)
            .build()
            .unwrap()
    }

    fn create_config(id: &str) -> ExperimentConfig {
        ExperimentConfig::new(ExperimentId::new(id).unwrap(), format!("Experiment {}", id))
            .with_variant(Variant::new(VariantName::Control), 50.0)
            .with_variant(
                Variant::new(VariantName::VariantA).with_config(
                    OptimizationConfig::new().with_buffer_size(256),
                ),
                50.0,
            )
            .with_min_sample_size(1)
            .with_success_threshold(5.0)
    }

    fn latency(value: f64) -> PerformanceMetrics {
        PerformanceMetrics::new(value, 45.0, 900.0, 0)
    }

    fn latency_above_100() -> RollbackCondition {
        RollbackCondition::new(
            MetricKey::Latency,
            ComparisonOperator::GreaterThan,
            100.0,
            Duration::from_millis(60_000),
        )
    }

    /// Let spawned persistence tasks run
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_create_experiment() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();

            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Draft)
            );
            assert!(service.get_active_experiments().is_empty());
        }

        #[tokio::test]
        async fn test_create_duplicate() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();

            let err = service.create_experiment(create_config("exp1")).unwrap_err();
            assert!(err.is_validation());
            assert!(err.to_string().contains("already exists"));
        }

        #[tokio::test]
        async fn test_create_rejects_bad_split() {
            let service = create_service();
            let config = create_config("exp1").with_traffic_split(vec![50.0, 40.0]);

            let err = service.create_experiment(config).unwrap_err();
            assert!(err.is_validation());
            assert!(service.get_experiment_status("exp1").is_none());
        }

        #[tokio::test]
        async fn test_create_rejects_single_variant() {
            let service = create_service();
            let config = ExperimentConfig::new(ExperimentId::new("exp1").unwrap(), "One arm")
                .with_variant(Variant::new(VariantName::Control), 100.0);

            assert!(service.create_experiment(config).unwrap_err().is_validation());
        }

        #[tokio::test]
        async fn test_create_rejects_duration_over_cap() {
            let service = create_service();
            let config =
                create_config("exp1").with_duration(Duration::from_secs(31 * 24 * 60 * 60));

            assert!(service.create_experiment(config).unwrap_err().is_validation());
        }

        #[tokio::test]
        async fn test_start_experiment() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Running)
            );
            assert_eq!(service.get_active_experiments().len(), 1);
            assert!(service.inner.scheduler.is_armed(&ExperimentId::new("exp1").unwrap()));
        }

        #[tokio::test]
        async fn test_start_unknown_is_not_found() {
            let service = create_service();

            assert!(service.start_experiment("missing").unwrap_err().is_not_found());
            assert!(service.start_experiment("not a valid id").unwrap_err().is_not_found());
        }

        #[tokio::test]
        async fn test_start_twice_is_invalid_state() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            assert!(service.start_experiment("exp1").unwrap_err().is_invalid_state());
        }

        #[tokio::test]
        async fn test_pause_and_resume() {
            let service = create_service();
            let id = ExperimentId::new("exp1").unwrap();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            service.pause_experiment("exp1").unwrap();
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Paused)
            );
            assert!(!service.inner.scheduler.is_armed(&id));
            assert!(service.get_variant_for_user("exp1", "userA").is_none());

            service.start_experiment("exp1").unwrap();
            assert!(service.inner.scheduler.is_armed(&id));
            assert!(service.get_variant_for_user("exp1", "userA").is_some());
        }

        #[tokio::test]
        async fn test_pause_draft_is_invalid_state() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();

            assert!(service.pause_experiment("exp1").unwrap_err().is_invalid_state());
        }

        #[tokio::test]
        async fn test_end_experiment() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();
            service.get_variant_for_user("exp1", "userA").unwrap();

            service.end_experiment("exp1").unwrap();

            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Completed)
            );
            assert!(service.get_last_analysis("exp1").is_some());
            assert!(service.get_variant_for_user("exp1", "userA").is_none());
            assert!(!service.inner.scheduler.is_armed(&ExperimentId::new("exp1").unwrap()));

            // Second call only recomputes the analysis
            service.end_experiment("exp1").unwrap();
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Completed)
            );
        }

        #[tokio::test]
        async fn test_end_unknown_is_not_found() {
            let service = create_service();
            assert!(service.end_experiment("missing").unwrap_err().is_not_found());
        }

        #[tokio::test]
        async fn test_end_draft_is_invalid_state() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();

            assert!(service.end_experiment("exp1").unwrap_err().is_invalid_state());
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Draft)
            );
            assert!(service.get_last_analysis("exp1").is_none());
        }

        #[tokio::test]
        async fn test_end_rolls_back_degraded_experiment() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            service.record_metrics("exp1", VariantName::Control, latency(50.0), "s1", None);
            service.record_metrics("exp1", VariantName::VariantA, latency(65.0), "s2", None);

            service.end_experiment("exp1").unwrap();

            let state = service.get_experiment_state("exp1").unwrap();
            assert_eq!(state.status(), ExperimentStatus::RolledBack);
            assert!(state.rollback_triggered());
            assert!(state.rollback_reason().unwrap().contains("Final analysis"));
        }

        #[tokio::test]
        async fn test_fail_experiment() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();
            service.get_variant_for_user("exp1", "userA").unwrap();

            service.fail_experiment("exp1", "audio device lost").unwrap();

            let state = service.get_experiment_state("exp1").unwrap();
            assert_eq!(state.status(), ExperimentStatus::Failed);
            assert_eq!(state.failure_reason(), Some("audio device lost"));
            assert!(service.get_variant_for_user("exp1", "userA").is_none());
        }

        #[tokio::test]
        async fn test_fail_draft_is_invalid_state() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();

            assert!(service
                .fail_experiment("exp1", "no reason")
                .unwrap_err()
                .is_invalid_state());
        }

        #[tokio::test]
        async fn test_dispose_clears_everything() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            service.dispose();

            assert!(service.get_experiment_status("exp1").is_none());
            assert!(service.get_active_experiments().is_empty());
            assert_eq!(service.inner.scheduler.armed_count(), 0);
            assert!(service.start_experiment("exp1").unwrap_err().is_not_found());
        }
    }

    mod assignment {
        use super::*;

        #[tokio::test]
        async fn test_assignment_is_sticky() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            for i in 0..20 {
                let user = format!("user-{}", i);
                let first = service.get_variant_for_user("exp1", &user).unwrap();
                let second = service.get_variant_for_user("exp1", &user).unwrap();
                assert_eq!(first.name(), second.name());
            }

            let state = service.get_experiment_state("exp1").unwrap();
            assert_eq!(state.participant_count(), 20);
        }

        #[tokio::test]
        async fn test_assignment_matches_pure_bucketing() {
            let service = create_service();
            let config = create_config("exp1");
            service.create_experiment(config.clone()).unwrap();
            service.start_experiment("exp1").unwrap();

            let variant = service.get_variant_for_user("exp1", "userA").unwrap();
            assert_eq!(
                variant.name(),
                AssignmentEngine::select_variant(&config, "userA")
            );
        }

        #[tokio::test]
        async fn test_fail_open_when_not_running() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();

            // Draft
            assert!(service.get_variant_for_user("exp1", "userA").is_none());

            // Completed
            service.start_experiment("exp1").unwrap();
            service.end_experiment("exp1").unwrap();
            assert!(service.get_variant_for_user("exp1", "userA").is_none());

            // Unknown
            assert!(service.get_variant_for_user("missing", "userA").is_none());
        }

        #[tokio::test]
        async fn test_device_targeting_without_device_info() {
            let service = create_service();
            let config = create_config("exp1").with_device_targeting(DeviceTargeting {
                platforms: vec!["macos".into()],
                ..Default::default()
            });
            service.create_experiment(config).unwrap();
            service.start_experiment("exp1").unwrap();

            assert!(service.get_variant_for_user("exp1", "userA").is_none());
            assert_eq!(
                service.get_experiment_state("exp1").unwrap().participant_count(),
                0
            );
        }

        #[tokio::test]
        async fn test_apply_variant_config() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();

            let config = service
                .apply_variant_config("exp1", VariantName::VariantA)
                .unwrap();
            assert_eq!(config.buffer_size, Some(256));

            assert!(service
                .apply_variant_config("exp1", VariantName::VariantC)
                .unwrap_err()
                .is_not_found());
            assert!(service
                .apply_variant_config("missing", VariantName::Control)
                .unwrap_err()
                .is_not_found());
        }
    }

    mod recording {
        use super::*;

        #[tokio::test]
        async fn test_record_ignored_when_not_running() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();

            service.record_metrics("exp1", VariantName::Control, latency(20.0), "s1", None);
            service.record_metrics("missing", VariantName::Control, latency(20.0), "s1", None);

            assert!(service.get_experiment_state("exp1").unwrap().results().is_empty());
        }

        #[tokio::test]
        async fn test_record_ignores_unknown_variant() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            service.record_metrics("exp1", VariantName::VariantB, latency(20.0), "s1", None);

            assert!(service.get_experiment_state("exp1").unwrap().results().is_empty());
        }

        #[tokio::test]
        async fn test_record_keeps_user_id() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            service.record_metrics(
                "exp1",
                VariantName::Control,
                latency(20.0),
                "sess1",
                Some("userA"),
            );

            let state = service.get_experiment_state("exp1").unwrap();
            let result = state.results().front().unwrap();
            assert_eq!(result.user_id.as_deref(), Some("userA"));
            assert_eq!(result.session_id, "sess1");
            assert_eq!(state.variant_buffer(VariantName::Control).count(), 1);
        }

        #[tokio::test]
        async fn test_result_history_is_bounded() {
            let config = EngineConfig {
                max_results_per_experiment: 5,
                max_buffered_results_per_variant: 2,
                ..EngineConfig::default()
            };
            let service = ExperimentService::new(config).unwrap();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            for i in 0..12 {
                service.record_metrics("exp1", VariantName::Control, latency(f64::from(i)), "s", None);
            }

            let state = service.get_experiment_state("exp1").unwrap();
            assert_eq!(state.results().len(), 5);
            assert_eq!(state.results().front().unwrap().raw.latency, 7.0);
            assert_eq!(state.variant_buffer(VariantName::Control).count(), 2);
        }
    }

    mod rollback {
        use super::*;

        #[tokio::test]
        async fn test_rollback_clears_exposure() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            let users: Vec<String> = (0..10).map(|i| format!("user-{}", i)).collect();
            for user in &users {
                assert!(service.get_variant_for_user("exp1", user).is_some());
            }

            service.rollback_experiment("exp1").unwrap();

            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::RolledBack)
            );
            for user in &users {
                assert!(service.get_variant_for_user("exp1", user).is_none());
            }
            assert_eq!(
                service.inner.lock().assignments.count_for(&ExperimentId::new("exp1").unwrap()),
                0
            );
        }

        #[tokio::test]
        async fn test_rollback_is_idempotent() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            service.rollback_experiment("exp1").unwrap();
            service.rollback_experiment("exp1").unwrap();

            let state = service.get_experiment_state("exp1").unwrap();
            assert!(state.rollback_triggered());
            assert_eq!(state.rollback_reason(), Some("Manual rollback"));
        }

        #[tokio::test]
        async fn test_rollback_unknown_is_not_found() {
            let service = create_service();
            assert!(service.rollback_experiment("missing").unwrap_err().is_not_found());
        }

        #[tokio::test]
        async fn test_rollback_draft_is_invalid_state() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();

            assert!(service
                .rollback_experiment("exp1")
                .unwrap_err()
                .is_invalid_state());

            let state = service.get_experiment_state("exp1").unwrap();
            assert_eq!(state.status(), ExperimentStatus::Draft);
            assert!(!state.rollback_triggered());

            // Still startable afterwards
            service.start_experiment("exp1").unwrap();
        }

        #[tokio::test]
        async fn test_rollback_after_end() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();
            service.end_experiment("exp1").unwrap();

            service.rollback_experiment("exp1").unwrap();
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::RolledBack)
            );
        }

        #[tokio::test]
        async fn test_condition_triggers_rollback() {
            let service = create_service();
            let config = create_config("exp1").with_rollback_condition(latency_above_100());
            service.create_experiment(config).unwrap();
            service.start_experiment("exp1").unwrap();

            for session in ["s1", "s2", "s3"] {
                service.record_metrics("exp1", VariantName::VariantA, latency(150.0), session, None);
            }
            service.check_rollback_conditions("exp1").unwrap();

            let state = service.get_experiment_state("exp1").unwrap();
            assert_eq!(state.status(), ExperimentStatus::RolledBack);
            assert!(state.rollback_triggered());
            assert!(state.rollback_reason().unwrap().contains("latency > 100"));
            assert!(!service.inner.scheduler.is_armed(&ExperimentId::new("exp1").unwrap()));
        }

        #[tokio::test]
        async fn test_rollback_visible_to_next_recording() {
            let service = create_service();
            let config = create_config("exp1").with_rollback_condition(latency_above_100());
            service.create_experiment(config).unwrap();
            service.start_experiment("exp1").unwrap();

            service.record_metrics("exp1", VariantName::VariantA, latency(150.0), "s1", None);
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::RolledBack)
            );

            // Dropped: the experiment no longer runs
            service.record_metrics("exp1", VariantName::VariantA, latency(150.0), "s2", None);
            assert_eq!(service.get_experiment_state("exp1").unwrap().results().len(), 1);
        }

        #[tokio::test]
        async fn test_check_without_data_keeps_running() {
            let service = create_service();
            let config = create_config("exp1").with_rollback_condition(latency_above_100());
            service.create_experiment(config).unwrap();
            service.start_experiment("exp1").unwrap();

            assert!(!service.check_rollback_conditions("exp1").unwrap());
            service.record_metrics("exp1", VariantName::Control, latency(40.0), "s1", None);
            assert!(!service.check_rollback_conditions("exp1").unwrap());
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Running)
            );
        }

        #[tokio::test]
        async fn test_check_unknown_is_not_found() {
            let service = create_service();
            assert!(service
                .check_rollback_conditions("missing")
                .unwrap_err()
                .is_not_found());
        }
    }

    mod analysis {
        use super::*;

        #[tokio::test]
        async fn test_assigned_variant_scenario() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();

            let first = service.get_variant_for_user("exp1", "userA").unwrap();
            let second = service.get_variant_for_user("exp1", "userA").unwrap();
            assert_eq!(first.name(), second.name());

            service.record_metrics("exp1", first.name(), latency(20.0), "sess1", None);

            let analysis = service.analyze_experiment("exp1").unwrap();
            let entry = analysis.variant_result(first.name()).unwrap();
            assert_eq!(entry.sample_size, 1);
            assert_eq!(analysis.total_samples, 1);
        }

        #[tokio::test]
        async fn test_winner_requires_threshold() {
            let service = create_service();
            let config = create_config("exp1").with_success_threshold(50.0);
            service.create_experiment(config).unwrap();
            service.start_experiment("exp1").unwrap();

            service.record_metrics("exp1", VariantName::Control, latency(50.0), "s1", None);
            // Best variant, but only +20% over control
            service.record_metrics("exp1", VariantName::VariantA, latency(40.0), "s2", None);

            let analysis = service.analyze_experiment("exp1").unwrap();
            assert!(analysis.winning_variant.is_none());
        }

        #[tokio::test]
        async fn test_analyze_unknown_is_not_found() {
            let service = create_service();
            assert!(service.analyze_experiment("missing").unwrap_err().is_not_found());
        }

        #[tokio::test]
        async fn test_analyze_stores_last_analysis() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            assert!(service.get_last_analysis("exp1").is_none());

            let analysis = service.analyze_experiment("exp1").unwrap();
            assert_eq!(service.get_last_analysis("exp1"), Some(analysis));
        }
    }

    mod timers {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_auto_end_after_duration() {
            let service = create_service();
            let config = create_config("exp1").with_duration(Duration::from_secs(3600));
            service.create_experiment(config).unwrap();
            service.start_experiment("exp1").unwrap();

            tokio::time::sleep(Duration::from_secs(1800)).await;
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Running)
            );

            tokio::time::sleep(Duration::from_secs(1801)).await;
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Completed)
            );
            assert!(service.get_last_analysis("exp1").is_some());
        }

        #[tokio::test(start_paused = true)]
        async fn test_paused_experiment_does_not_auto_end() {
            let service = create_service();
            let config = create_config("exp1").with_duration(Duration::from_secs(60));
            service.create_experiment(config).unwrap();
            service.start_experiment("exp1").unwrap();
            service.pause_experiment("exp1").unwrap();

            tokio::time::sleep(Duration::from_secs(600)).await;
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Paused)
            );
        }

        #[tokio::test(start_paused = true)]
        async fn test_periodic_analysis_updates_last_analysis() {
            let service = create_service();
            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();
            service.record_metrics("exp1", VariantName::Control, latency(30.0), "s1", None);

            assert!(service.get_last_analysis("exp1").is_none());

            tokio::time::sleep(Duration::from_secs(61)).await;
            let analysis = service.get_last_analysis("exp1").unwrap();
            assert_eq!(analysis.total_samples, 1);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn test_periodic_check_rolls_back_once_window_slides() {
            let service = ExperimentService::new(EngineConfig {
                rollback_check_interval_secs: 1,
                ..EngineConfig::default()
            })
            .unwrap();
            let fast = RollbackCondition::new(
                MetricKey::Latency,
                ComparisonOperator::LessThan,
                100.0,
                Duration::from_millis(1500),
            );
            let config = create_config("exp1").with_rollback_condition(fast);
            service.create_experiment(config).unwrap();
            service.start_experiment("exp1").unwrap();

            service.record_metrics("exp1", VariantName::VariantA, latency(150.0), "s1", None);
            tokio::time::sleep(Duration::from_millis(600)).await;
            service.record_metrics("exp1", VariantName::VariantA, latency(60.0), "s2", None);

            // Mean of 150 and 60 is still above the threshold
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Running)
            );

            // The 1s tick still sees both samples; the 2s tick only sees the 60
            tokio::time::sleep(Duration::from_millis(2000)).await;

            let state = service.get_experiment_state("exp1").unwrap();
            assert_eq!(state.status(), ExperimentStatus::RolledBack);
            assert!(state.rollback_triggered());
            assert!(state.rollback_reason().unwrap().contains("latency < 100"));
            assert!(!service.inner.scheduler.is_armed(&ExperimentId::new("exp1").unwrap()));

            service.dispose();
        }

        #[tokio::test(start_paused = true)]
        async fn test_dispose_cancels_timers() {
            let service = create_service();
            let config = create_config("exp1").with_duration(Duration::from_secs(60));
            service.create_experiment(config).unwrap();
            service.start_experiment("exp1").unwrap();

            service.dispose();
            tokio::time::sleep(Duration::from_secs(600)).await;

            assert!(service.get_experiment_status("exp1").is_none());
        }
    }

    mod storage {
        use super::*;

        #[tokio::test]
        async fn test_lifecycle_is_persisted() {
            let store = Arc::new(MockExperimentStore::new());
            let service = create_service_with_store(store.clone());
            let id = ExperimentId::new("exp1").unwrap();

            service.create_experiment(create_config("exp1")).unwrap();
            settle().await;
            assert_eq!(
                store.saved_state(&id).unwrap().status(),
                ExperimentStatus::Draft
            );

            service.start_experiment("exp1").unwrap();
            service.record_metrics("exp1", VariantName::Control, latency(30.0), "s1", None);
            settle().await;

            assert_eq!(
                store.saved_state(&id).unwrap().status(),
                ExperimentStatus::Running
            );
            assert_eq!(store.saved_result_count(), 1);
        }

        #[tokio::test]
        async fn test_storage_errors_never_propagate() {
            let store = Arc::new(MockExperimentStore::new().with_error());
            let service = create_service_with_store(store.clone());

            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();
            assert!(service.get_variant_for_user("exp1", "userA").is_some());
            service.record_metrics("exp1", VariantName::Control, latency(30.0), "s1", None);
            service.end_experiment("exp1").unwrap();
            settle().await;

            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Completed)
            );
            assert_eq!(store.saved_result_count(), 0);
        }

        #[tokio::test]
        async fn test_restore_from_storage() {
            let invalid = ExperimentConfig::new(ExperimentId::new("broken").unwrap(), "One arm")
                .with_variant(Variant::new(VariantName::Control), 100.0);
            let store = Arc::new(
                MockExperimentStore::new()
                    .with_config(create_config("exp1"))
                    .with_config(invalid),
            );
            let service = create_service_with_store(store);

            assert_eq!(service.restore_from_storage().await, 1);
            assert_eq!(
                service.get_experiment_status("exp1"),
                Some(ExperimentStatus::Draft)
            );
            assert!(service.get_experiment_status("broken").is_none());

            // Already registered
            assert_eq!(service.restore_from_storage().await, 0);
        }

        #[tokio::test]
        async fn test_restore_with_failing_store() {
            let store = Arc::new(MockExperimentStore::new().with_error());
            let service = create_service_with_store(store);

            assert_eq!(service.restore_from_storage().await, 0);
        }

        #[test]
        fn test_works_without_runtime() {
            let store = Arc::new(MockExperimentStore::new());
            let service = create_service_with_store(store.clone());

            service.create_experiment(create_config("exp1")).unwrap();
            service.start_experiment("exp1").unwrap();
            assert!(service.get_variant_for_user("exp1", "userA").is_some());

            assert!(store
                .saved_state(&ExperimentId::new("exp1").unwrap())
                .is_none());
        }
    }

    #[test]
    fn test_invalid_engine_config_is_rejected() {
        let config = EngineConfig {
            confidence_level: 0.0,
            ..EngineConfig::default()
        };

        assert!(ExperimentService::new(config).is_err());
    }
}

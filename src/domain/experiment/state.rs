//! Runtime state of a registered experiment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::entity::{duration_millis, ExperimentConfig, ExperimentStatus, VariantName};
use super::record::ExperimentResult;
use super::result::ExperimentAnalysis;
use crate::domain::DomainError;

/// Mutable runtime state owned by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentState {
    config: ExperimentConfig,
    status: ExperimentStatus,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resumed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ended_at: Option<DateTime<Utc>>,
    /// Running time accumulated before the current run segment
    #[serde(with = "duration_millis")]
    elapsed_before_pause: Duration,
    participant_count: u64,
    rollback_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rollback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_analysis: Option<ExperimentAnalysis>,
    /// Full history used for analysis and rollback checks, oldest first
    #[serde(skip)]
    results: VecDeque<ExperimentResult>,
    /// Recent samples per variant for live monitoring
    #[serde(skip)]
    variant_buffers: HashMap<VariantName, VecDeque<ExperimentResult>>,
}

impl ExperimentState {
    /// Fresh draft state for a validated config
    pub fn new(config: ExperimentConfig) -> Self {
        Self {
            config,
            status: ExperimentStatus::Draft,
            created_at: Utc::now(),
            started_at: None,
            resumed_at: None,
            ended_at: None,
            elapsed_before_pause: Duration::ZERO,
            participant_count: 0,
            rollback_triggered: false,
            rollback_reason: None,
            failure_reason: None,
            last_analysis: None,
            results: VecDeque::new(),
            variant_buffers: HashMap::new(),
        }
    }

    // Getters

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn participant_count(&self) -> u64 {
        self.participant_count
    }

    pub fn rollback_triggered(&self) -> bool {
        self.rollback_triggered
    }

    pub fn rollback_reason(&self) -> Option<&str> {
        self.rollback_reason.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn last_analysis(&self) -> Option<&ExperimentAnalysis> {
        self.last_analysis.as_ref()
    }

    /// All retained results, oldest first
    pub fn results(&self) -> &VecDeque<ExperimentResult> {
        &self.results
    }

    /// Recent results for one variant, bounded by `max_buffered`, oldest first
    pub fn variant_buffer(&self, variant: VariantName) -> impl Iterator<Item = &ExperimentResult> {
        self.variant_buffers
            .get(&variant)
            .into_iter()
            .flat_map(|buffer| buffer.iter())
    }

    /// Copy of the lifecycle fields without the result history
    pub fn snapshot(&self) -> Self {
        Self {
            config: self.config.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            resumed_at: self.resumed_at,
            ended_at: self.ended_at,
            elapsed_before_pause: self.elapsed_before_pause,
            participant_count: self.participant_count,
            rollback_triggered: self.rollback_triggered,
            rollback_reason: self.rollback_reason.clone(),
            failure_reason: self.failure_reason.clone(),
            last_analysis: self.last_analysis.clone(),
            results: VecDeque::new(),
            variant_buffers: HashMap::new(),
        }
    }

    /// Running time so far, excluding paused periods
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let current = self
            .resumed_at
            .filter(|_| self.status.is_running())
            .and_then(|resumed| (now - resumed).to_std().ok())
            .unwrap_or_default();

        self.elapsed_before_pause + current
    }

    /// Time left before the experiment should end on its own
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.config.duration().saturating_sub(self.elapsed(now))
    }

    // Transitions

    /// Draft/Paused -> Running
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(ExperimentStatus::Running, "start")?;

        if self.started_at.is_none() {
            self.started_at = Some(now);
        }

        self.resumed_at = Some(now);
        Ok(())
    }

    /// Running -> Paused
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        let elapsed = self.elapsed(now);
        self.transition(ExperimentStatus::Paused, "pause")?;
        self.elapsed_before_pause = elapsed;
        self.resumed_at = None;
        Ok(())
    }

    /// Running/Paused -> Completed
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.close(ExperimentStatus::Completed, "end", now)
    }

    /// Running/Paused -> Failed
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.close(ExperimentStatus::Failed, "fail", now)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// -> RolledBack. Once set, `rollback_triggered` stays true.
    pub fn roll_back(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.close(ExperimentStatus::RolledBack, "roll back", now)?;
        self.rollback_triggered = true;
        self.rollback_reason = Some(reason.into());
        Ok(())
    }

    fn close(
        &mut self,
        target: ExperimentStatus,
        operation: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let elapsed = self.elapsed(now);
        self.transition(target, operation)?;
        self.elapsed_before_pause = elapsed;
        self.resumed_at = None;
        self.ended_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, target: ExperimentStatus, operation: &str) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::invalid_state(self.status, operation));
        }

        self.status = target;
        Ok(())
    }

    // Counters and buffers

    pub fn record_participant(&mut self) {
        self.participant_count += 1;
    }

    /// Append a result, evicting the oldest entries beyond the given bounds
    pub fn push_result(&mut self, result: ExperimentResult, max_results: usize, max_buffered: usize) {
        let buffer = self.variant_buffers.entry(result.variant).or_default();
        buffer.push_back(result.clone());

        while buffer.len() > max_buffered.max(1) {
            buffer.pop_front();
        }

        self.results.push_back(result);

        while self.results.len() > max_results.max(1) {
            self.results.pop_front();
        }
    }

    pub fn set_last_analysis(&mut self, analysis: ExperimentAnalysis) {
        self.last_analysis = Some(analysis);
    }
}

//! Timer bookkeeping for running experiments
//!
//! Each running experiment owns a one-shot auto-end timer and a repeating rollback
//! check. A single engine-wide task re-runs analysis for all running experiments.
//! Every handle is kept here so terminal transitions and `dispose` can abort them.

use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::domain::experiment::ExperimentId;

#[derive(Debug)]
struct ExperimentTimers {
    auto_end: JoinHandle<()>,
    rollback_check: JoinHandle<()>,
}

impl ExperimentTimers {
    fn abort(self) {
        self.auto_end.abort();
        self.rollback_check.abort();
    }
}

#[derive(Debug, Default)]
struct Timers {
    experiments: HashMap<ExperimentId, ExperimentTimers>,
    analysis: Option<JoinHandle<()>>,
}

/// Owns every scheduled task of the engine
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: Mutex<Timers>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the auto-end timer and the periodic rollback check of one experiment,
    /// replacing any timers it already had.
    ///
    /// Returns `false` when called outside a Tokio runtime; nothing is armed then.
    pub fn arm_experiment<E, C>(
        &self,
        id: &ExperimentId,
        end_after: Duration,
        check_every: Duration,
        on_end: E,
        on_check: C,
    ) -> bool
    where
        E: FnOnce() + Send + 'static,
        C: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            warn!(experiment_id = %id, "No async runtime available, experiment timers not armed");
            return false;
        };

        let auto_end = handle.spawn(async move {
            tokio::time::sleep(end_after).await;
            on_end();
        });
        let rollback_check = handle.spawn(repeat(check_every, on_check));

        let mut timers = self.lock();
        if let Some(previous) = timers.experiments.insert(
            id.clone(),
            ExperimentTimers {
                auto_end,
                rollback_check,
            },
        ) {
            previous.abort();
        }

        debug!(
            experiment_id = %id,
            end_after_secs = end_after.as_secs_f64(),
            check_every_secs = check_every.as_secs_f64(),
            "Experiment timers armed"
        );
        true
    }

    /// Start the engine-wide periodic analysis unless it is already running
    pub fn ensure_analysis_task<F>(&self, every: Duration, on_tick: F) -> bool
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let mut timers = self.lock();

        if timers.analysis.as_ref().is_some_and(|task| !task.is_finished()) {
            return true;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime available, periodic analysis not started");
            return false;
        };

        timers.analysis = Some(handle.spawn(repeat(every, on_tick)));
        debug!(every_secs = every.as_secs_f64(), "Periodic analysis started");
        true
    }

    /// Abort the timers of one experiment. Returns whether any were armed.
    pub fn cancel_experiment(&self, id: &ExperimentId) -> bool {
        match self.lock().experiments.remove(id) {
            Some(timers) => {
                timers.abort();
                debug!(experiment_id = %id, "Experiment timers cancelled");
                true
            }
            None => false,
        }
    }

    /// Abort everything, including the periodic analysis
    pub fn cancel_all(&self) {
        let mut timers = self.lock();

        for (_, experiment) in timers.experiments.drain() {
            experiment.abort();
        }

        if let Some(analysis) = timers.analysis.take() {
            analysis.abort();
        }
    }

    pub fn is_armed(&self, id: &ExperimentId) -> bool {
        self.lock().experiments.contains_key(id)
    }

    pub fn armed_count(&self) -> usize {
        self.lock().experiments.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Call `on_tick` every `period` (first call after one period) until it breaks
fn repeat<F>(period: Duration, mut on_tick: F) -> impl Future<Output = ()> + Send + 'static
where
    F: FnMut() -> ControlFlow<()> + Send + 'static,
{
    async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            if on_tick().is_break() {
                break;
            }
        }
    }
}

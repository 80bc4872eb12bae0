// src/run/registry.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::run::model::{PipelineRun, RunState};

/// Latest known run per logical date.
///
/// This is the idempotency boundary for `start_run`: a logical date with a
/// non-terminal run cannot be started again, a terminal one can. It also keeps
/// the final snapshot of each run so callers can ask which task failed.
///
/// Cloning is cheap; clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<DateTime<Utc>, PipelineRun>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DateTime<Utc>, PipelineRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `run.logical_date` for this run.
    pub fn register(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.lock();
        if let Some(existing) = runs.get(&run.logical_date) {
            if !existing.is_terminal() {
                return Err(PipelineError::DuplicateRun(format!(
                    "{} ({} is {})",
                    run.logical_date.to_rfc3339(),
                    existing.run_id,
                    existing.state
                )));
            }
            debug!(
                run_id = %run.run_id,
                previous_state = %existing.state,
                "re-running logical date"
            );
        }
        runs.insert(run.logical_date, run.clone());
        Ok(())
    }

    /// Replace the stored snapshot with the run's current state.
    pub fn record(&self, run: &PipelineRun) {
        self.lock().insert(run.logical_date, run.clone());
    }

    pub fn get(&self, logical_date: DateTime<Utc>) -> Option<PipelineRun> {
        self.lock().get(&logical_date).cloned()
    }

    pub fn state_of(&self, logical_date: DateTime<Utc>) -> Option<RunState> {
        self.lock().get(&logical_date).map(|run| run.state)
    }

    /// Number of registered runs that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|run| !run.is_terminal()).count()
    }

    /// Most recent logical date ever registered.
    pub fn latest_logical_date(&self) -> Option<DateTime<Utc>> {
        self.lock().keys().max().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::PipelineBuilder;
    use crate::run::model::RunKind;
    use chrono::TimeZone;

    fn run_for(day: u32) -> PipelineRun {
        let pipeline = PipelineBuilder::new("p")
            .chain([("a", "true")])
            .build()
            .unwrap();
        let date = Utc.with_ymd_and_hms(2026, 10, day, 0, 0, 0).unwrap();
        PipelineRun::new(&pipeline, date, RunKind::Scheduled)
    }

    #[test]
    fn active_run_blocks_same_logical_date() {
        let registry = RunRegistry::new();
        let run = run_for(18);
        registry.register(&run).unwrap();

        let again = registry.register(&run_for(18));
        assert!(matches!(again, Err(PipelineError::DuplicateRun(_))));

        // Different dates are independent.
        registry.register(&run_for(19)).unwrap();
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn terminal_run_is_re_runnable() {
        let registry = RunRegistry::new();
        let mut run = run_for(18);
        registry.register(&run).unwrap();

        run.state = RunState::Succeeded;
        registry.record(&run);
        assert_eq!(registry.state_of(run.logical_date), Some(RunState::Succeeded));

        registry.register(&run_for(18)).unwrap();
        assert_eq!(registry.state_of(run.logical_date), Some(RunState::Queued));
        assert_eq!(registry.latest_logical_date(), Some(run.logical_date));
    }
}

// src/engine/executor.rs

//! Public entry points for running a pipeline: `start_run` then `execute`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::dag::Pipeline;
use crate::engine::core::RunCore;
use crate::engine::runtime::Runtime;
use crate::engine::RunEvent;
use crate::errors::Result;
use crate::exec::{ExecutorBackend, RealExecutorBackend};
use crate::notify::{LogNotifier, NotificationPolicy, Notifier};
use crate::run::{PipelineRun, RunKind, RunRegistry, RunState};
use crate::types::CancelGrace;

/// Capacity of each run's event channel.
const EVENT_BUFFER: usize = 64;

/// Knobs applied to every run started by a [`PipelineExecutor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// What happens to a running command when its run is cancelled.
    pub cancel_grace: CancelGrace,
    pub notifications: NotificationPolicy,
}

impl ExecutorOptions {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            cancel_grace: cfg.pipeline.cancel_grace,
            notifications: NotificationPolicy::from_defaults(&cfg.default),
        }
    }
}

/// Starts and executes Pipeline Runs for one pipeline.
///
/// Runs for different logical dates are independent; the shared
/// [`RunRegistry`] prevents two live runs for the same date.
#[derive(Clone)]
pub struct PipelineExecutor {
    pipeline: Arc<Pipeline>,
    options: ExecutorOptions,
    notifier: Arc<dyn Notifier>,
    registry: RunRegistry,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("pipeline", &self.pipeline.id())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        options: ExecutorOptions,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            pipeline,
            options,
            notifier,
            registry: RunRegistry::new(),
        }
    }

    /// Build the pipeline from a validated config, notifying via the log.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let pipeline = Pipeline::from_config(cfg)?;
        Ok(Self::new(
            Arc::new(pipeline),
            ExecutorOptions::from_config(cfg),
            Arc::new(LogNotifier::from_defaults(&cfg.default)),
        ))
    }

    /// Share a registry with other executors (or inspect runs from outside).
    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Create a scheduled run for `logical_date` and move it to `running`.
    ///
    /// Fails with `DuplicateRun` if a non-terminal run for the same date
    /// exists, or with a config error if a retry policy is invalid.
    pub fn start_run(&self, logical_date: DateTime<Utc>) -> Result<PipelineRun> {
        self.start(logical_date, RunKind::Scheduled)
    }

    /// Same as [`start_run`](Self::start_run) for an operator-triggered run.
    pub fn start_manual_run(&self, logical_date: DateTime<Utc>) -> Result<PipelineRun> {
        self.start(logical_date, RunKind::Manual)
    }

    fn start(&self, logical_date: DateTime<Utc>, kind: RunKind) -> Result<PipelineRun> {
        // Builder-made pipelines always pass; crate-internal ones built with
        // `Pipeline::new_unchecked` are only checked here.
        self.pipeline.validate_retry_policies()?;

        let mut run = PipelineRun::new(&self.pipeline, logical_date, kind);
        self.registry.register(&run)?;
        debug!(run_id = %run.run_id, "run queued");

        run.state = RunState::Running;
        run.started_at = Some(Utc::now());
        self.registry.record(&run);

        info!(
            run_id = %run.run_id,
            pipeline = %run.pipeline_id,
            logical_date = %run.logical_date.to_rfc3339(),
            "run started"
        );
        Ok(run)
    }

    /// Wire a [`Runtime`] for `run`. `make_backend` receives the run's event
    /// sender, on which the backend must report task exits.
    pub fn runtime<E, F>(&self, run: PipelineRun, make_backend: F) -> Runtime<E>
    where
        E: ExecutorBackend,
        F: FnOnce(mpsc::Sender<RunEvent>) -> E,
    {
        let (tx, rx) = mpsc::channel::<RunEvent>(EVENT_BUFFER);
        let backend = make_backend(tx.clone());
        let core = RunCore::new(self.pipeline.clone(), run, self.options.notifications);
        Runtime::new(core, tx, rx, backend, self.notifier.clone())
            .with_registry(self.registry.clone())
    }

    /// Execute `run` to completion with real shell processes.
    pub async fn execute(&self, run: PipelineRun) -> Result<PipelineRun> {
        let grace = self.options.cancel_grace;
        self.execute_with(run, |tx| RealExecutorBackend::new(tx, grace))
            .await
    }

    /// Execute `run` to completion with a custom backend.
    pub async fn execute_with<E, F>(&self, run: PipelineRun, make_backend: F) -> Result<PipelineRun>
    where
        E: ExecutorBackend,
        F: FnOnce(mpsc::Sender<RunEvent>) -> E,
    {
        self.runtime(run, make_backend).run().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use std::time::Duration;

    use super::*;
    use crate::dag::pipeline::MAX_RETRIES;
    use crate::dag::{Pipeline, PipelineBuilder, RetryPolicy};
    use crate::errors::PipelineError;

    fn executor() -> PipelineExecutor {
        let pipeline = PipelineBuilder::new("p")
            .chain([("a", "true"), ("b", "true")])
            .build()
            .unwrap();
        PipelineExecutor::new(
            Arc::new(pipeline),
            ExecutorOptions::default(),
            Arc::new(LogNotifier::default()),
        )
    }

    #[test]
    fn start_run_moves_run_to_running() {
        let exec = executor();
        let date = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();

        let run = exec.start_run(date).unwrap();
        assert_eq!(run.state, RunState::Running);
        assert!(run.started_at.is_some());
        assert_eq!(run.run_id, "scheduled__2026-10-18T00:00:00+00:00");
        assert_eq!(exec.registry().state_of(date), Some(RunState::Running));
    }

    #[test]
    fn start_run_rejects_unchecked_retry_policy() {
        let built = PipelineBuilder::new("p")
            .chain([("a", "true"), ("b", "true")])
            .build()
            .unwrap();
        let mut tasks = built.tasks().to_vec();
        tasks[1].retry_policy = RetryPolicy::new(MAX_RETRIES + 1, Duration::from_secs(1));
        let pipeline = Pipeline::new_unchecked(
            built.id().to_string(),
            None,
            tasks,
            built.edges().to_vec(),
            built.graph().clone(),
        );
        let exec = PipelineExecutor::new(
            Arc::new(pipeline),
            ExecutorOptions::default(),
            Arc::new(LogNotifier::default()),
        );
        let date = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();

        match exec.start_run(date) {
            Err(PipelineError::InvalidRetryPolicy { task, .. }) => assert_eq!(task, "b"),
            other => panic!("expected InvalidRetryPolicy, got {other:?}"),
        }
        assert_eq!(exec.registry().state_of(date), None);
    }

    #[test]
    fn second_start_for_live_date_is_rejected() {
        let exec = executor();
        let date = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();

        exec.start_run(date).unwrap();
        assert!(matches!(
            exec.start_manual_run(date),
            Err(PipelineError::DuplicateRun(_))
        ));
    }
}

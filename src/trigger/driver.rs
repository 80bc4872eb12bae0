// src/trigger/driver.rs

//! Fires scheduled runs on the configured cadence.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PipelineSettings;
use crate::engine::{PipelineExecutor, RunCanceller, RunEvent};
use crate::errors::{PipelineError, Result};
use crate::exec::{ExecutorBackend, RealExecutorBackend};
use crate::run::PipelineRun;
use crate::trigger::schedule::{due_logical_dates, next_fire_time};
use crate::types::ScheduleCadence;

/// Creates the process backend for each run the driver starts.
pub type BackendFactory =
    Arc<dyn Fn(mpsc::Sender<RunEvent>) -> Box<dyn ExecutorBackend> + Send + Sync>;

type Cancellers = Arc<Mutex<HashMap<DateTime<Utc>, RunCanceller>>>;

/// Stand-in for the external scheduler.
///
/// Computes due logical dates, calls `start_run` for each and executes the
/// runs in the background. At most `max_active_runs` runs execute at once;
/// the rest wait for a slot before they are started.
pub struct ScheduleDriver {
    executor: PipelineExecutor,
    backend: BackendFactory,
    cadence: ScheduleCadence,
    start_date: DateTime<Utc>,
    catchup: bool,
    slots: Arc<Semaphore>,
    last_triggered: Option<DateTime<Utc>>,
    active: JoinSet<(DateTime<Utc>, Result<PipelineRun>)>,
    cancellers: Cancellers,
    shutting_down: Arc<AtomicBool>,
}

impl ScheduleDriver {
    pub fn new(executor: PipelineExecutor, settings: &PipelineSettings) -> Self {
        let grace = executor.options().cancel_grace;
        let backend: BackendFactory = Arc::new(move |tx| {
            Box::new(RealExecutorBackend::new(tx, grace)) as Box<dyn ExecutorBackend>
        });

        Self {
            executor,
            backend,
            cadence: settings.schedule,
            start_date: settings.start_date,
            catchup: settings.catchup,
            slots: Arc::new(Semaphore::new(settings.max_active_runs.max(1))),
            last_triggered: None,
            active: JoinSet::new(),
            cancellers: Arc::new(Mutex::new(HashMap::new())),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the process backend (tests use scripted fakes).
    pub fn with_backend(mut self, backend: BackendFactory) -> Self {
        self.backend = backend;
        self
    }

    pub fn last_triggered(&self) -> Option<DateTime<Utc>> {
        self.last_triggered
    }

    /// Number of runs started or waiting for a slot that have not finished.
    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    /// Start a run for every logical date due at `now`. Returns those dates.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let due = due_logical_dates(
            self.cadence,
            self.start_date,
            self.last_triggered,
            now,
            self.catchup,
        );

        for date in &due {
            self.spawn_run(*date);
        }
        if let Some(latest) = due.last() {
            self.last_triggered = Some(*latest);
        }
        due
    }

    fn spawn_run(&mut self, logical_date: DateTime<Utc>) {
        info!(logical_date = %logical_date.to_rfc3339(), "triggering scheduled run");

        let executor = self.executor.clone();
        let backend = self.backend.clone();
        let slots = self.slots.clone();
        let cancellers = self.cancellers.clone();
        let shutting_down = self.shutting_down.clone();

        self.active.spawn(async move {
            let result = run_scheduled(
                executor,
                backend,
                slots,
                cancellers,
                shutting_down,
                logical_date,
            )
            .await;
            (logical_date, result)
        });
    }

    /// Wait for every started run to finish. Results are in completion order.
    pub async fn wait_idle(&mut self) -> Vec<Result<PipelineRun>> {
        let mut results = Vec::new();
        while let Some(joined) = self.active.join_next().await {
            results.push(flatten_join(joined));
        }
        results
    }

    /// Cancel every active run and stop starting new ones.
    pub async fn cancel_all(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let cancellers: Vec<RunCanceller> = lock(&self.cancellers).values().cloned().collect();
        for canceller in cancellers {
            canceller.cancel().await;
        }
    }

    /// Trigger whatever is due now and wait for those runs.
    pub async fn run_once(mut self, now: DateTime<Utc>) -> Vec<Result<PipelineRun>> {
        let due = self.tick(now);
        if due.is_empty() {
            info!("no scheduled run is due");
        }
        self.wait_idle().await
    }

    /// Keep firing runs on the cadence until `shutdown` resolves, then cancel
    /// active runs and wait for them to finish.
    pub async fn run_until<S>(mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let now = Utc::now();
            self.tick(now);

            let next = next_fire_time(self.cadence, self.start_date, self.last_triggered, now);
            if next.is_none() && self.active.is_empty() {
                info!("schedule exhausted; driver stopping");
                return Ok(());
            }
            let sleep_for = next
                .map(|at| (at - now).to_std().unwrap_or_default())
                .unwrap_or(std::time::Duration::MAX);
            debug!(next = ?next.map(|at| at.to_rfc3339()), "waiting for next fire time");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested; cancelling active runs");
                    self.cancel_all().await;
                    for result in self.wait_idle().await {
                        log_outcome(&result);
                    }
                    return Ok(());
                }
                Some(joined) = self.active.join_next(), if !self.active.is_empty() => {
                    log_outcome(&flatten_join(joined));
                }
                _ = tokio::time::sleep(sleep_for), if next.is_some() => {}
            }
        }
    }
}

async fn run_scheduled(
    executor: PipelineExecutor,
    backend: BackendFactory,
    slots: Arc<Semaphore>,
    cancellers: Cancellers,
    shutting_down: Arc<AtomicBool>,
    logical_date: DateTime<Utc>,
) -> Result<PipelineRun> {
    if slots.available_permits() == 0 {
        info!(
            logical_date = %logical_date.to_rfc3339(),
            "max_active_runs reached; run waiting for a slot"
        );
    }
    let _slot = slots
        .acquire_owned()
        .await
        .map_err(anyhow::Error::from)?;

    let runtime = {
        let mut guard = lock(&cancellers);
        if shutting_down.load(Ordering::SeqCst) {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "driver shut down before run for {} started",
                logical_date.to_rfc3339()
            )));
        }
        let run = executor.start_run(logical_date)?;
        let runtime = executor.runtime(run, |tx| (backend)(tx));
        guard.insert(logical_date, runtime.canceller());
        runtime
    };

    let result = runtime.run().await;
    lock(&cancellers).remove(&logical_date);
    result
}

fn lock(cancellers: &Cancellers) -> MutexGuard<'_, HashMap<DateTime<Utc>, RunCanceller>> {
    cancellers.lock().unwrap_or_else(PoisonError::into_inner)
}

fn flatten_join(
    joined: std::result::Result<(DateTime<Utc>, Result<PipelineRun>), tokio::task::JoinError>,
) -> Result<PipelineRun> {
    match joined {
        Ok((_, result)) => result,
        Err(err) => Err(PipelineError::Other(anyhow::Error::from(err))),
    }
}

fn log_outcome(result: &Result<PipelineRun>) {
    match result {
        Ok(run) => info!(run_id = %run.run_id, state = %run.state, "scheduled run finished"),
        Err(err) => warn!(error = %err, "scheduled run did not complete"),
    }
}

// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::core::RunCore;
use crate::engine::{CoreCommand, RunEvent, ScheduledTask, TaskId};
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::notify::Notifier;
use crate::run::{PipelineRun, RunRegistry};

/// Drives one Pipeline Run in response to `RunEvent`s, and delegates actual
/// command execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `RunCore`, which contains all the run
/// semantics. This struct handles async IO: reading events from the channel,
/// dispatching attempts to the executor, arming retry timers and delivering
/// notifications.
pub struct Runtime<E: ExecutorBackend> {
    core: RunCore,
    event_tx: mpsc::Sender<RunEvent>,
    event_rx: mpsc::Receiver<RunEvent>,
    executor: E,
    notifier: Arc<dyn Notifier>,
    registry: Option<RunRegistry>,
    retry_timers: Vec<JoinHandle<()>>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("pending_retry_timers", &self.retry_timers.len())
            .finish_non_exhaustive()
    }
}

/// Handle used to request cancellation of a running Pipeline Run.
#[derive(Debug, Clone)]
pub struct RunCanceller {
    tx: mpsc::Sender<RunEvent>,
}

impl RunCanceller {
    /// Ask the run to stop. Returns `false` if the run has already finished.
    pub async fn cancel(&self) -> bool {
        self.tx.send(RunEvent::CancelRequested).await.is_ok()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    /// `event_tx` must be the sending half of `event_rx`; the executor
    /// backend is expected to report exits on a clone of it.
    pub fn new(
        core: RunCore,
        event_tx: mpsc::Sender<RunEvent>,
        event_rx: mpsc::Receiver<RunEvent>,
        executor: E,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            core,
            event_tx,
            event_rx,
            executor,
            notifier,
            registry: None,
            retry_timers: Vec::new(),
        }
    }

    /// Record the final run snapshot in `registry` when the loop ends.
    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn canceller(&self) -> RunCanceller {
        RunCanceller {
            tx: self.event_tx.clone(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.core.run().run_id
    }

    /// Main event loop.
    ///
    /// - Seeds the run with its first ready task.
    /// - Consumes `RunEvent`s from `event_rx` and feeds them into the core.
    /// - Executes commands returned by the core.
    ///
    /// Returns the terminal run. A failed run is still `Ok`; `Err` means the
    /// engine itself broke (an invariant, or the backend refused a launch).
    /// The run is then failed and notified like any other failed run and
    /// recorded before the error is returned.
    pub async fn run(mut self) -> Result<PipelineRun> {
        info!(run_id = %self.run_id(), "run started");

        if let Err(err) = self.drive().await {
            error!(run_id = %self.run_id(), error = %err, "run aborted");
            let step = self.core.abort();
            for command in step.commands {
                if let Err(e) = self.execute_command(command).await {
                    warn!(run_id = %self.run_id(), error = %e, "cleanup after abort failed");
                }
            }
            self.shutdown();
            return Err(err);
        }

        self.shutdown();
        let run = self.core.into_run();
        info!(run_id = %run.run_id, state = %run.state, "run finished");
        Ok(run)
    }

    async fn drive(&mut self) -> Result<()> {
        let step = self.core.begin()?;
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            // Never `None`: `self.event_tx` keeps the channel open.
            let Some(event) = self.event_rx.recv().await else {
                break;
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event)?;
            for command in step.commands {
                self.execute_command(command).await?;
            }
            keep_running = step.keep_running;
        }
        Ok(())
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Launch(task) => self.launch(task).await?,
            CoreCommand::ScheduleRetry {
                task,
                attempt,
                delay,
            } => self.arm_retry_timer(task, attempt, delay),
            CoreCommand::CancelTasks(tasks) => {
                for task in tasks {
                    debug!(task = %task, "forwarding cancellation to executor");
                    self.executor.cancel(task).await?;
                }
            }
            CoreCommand::Notify(notification) => self.notifier.notify(&notification),
        }
        Ok(())
    }

    async fn launch(&mut self, task: ScheduledTask) -> Result<()> {
        debug!(
            task = %task.task_id,
            attempt = task.attempt,
            run_id = %task.run_id,
            "dispatching task attempt"
        );
        self.executor.launch(task).await
    }

    /// The run keeps processing events while the timer is pending, so a
    /// cancellation during the delay is seen immediately.
    fn arm_retry_timer(&mut self, task: TaskId, attempt: u32, delay: std::time::Duration) {
        debug!(task = %task, attempt, ?delay, "arming retry timer");
        let tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RunEvent::RetryDue { task, attempt }).await;
        });
        self.retry_timers.push(handle);
    }

    fn shutdown(&mut self) {
        for timer in self.retry_timers.drain(..) {
            timer.abort();
        }
        if let Some(registry) = &self.registry {
            registry.record(self.core.run());
        }
    }
}

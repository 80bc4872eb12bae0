// src/engine/core.rs

//! Pure per-run state machine.
//!
//! `RunCore` consumes [`RunEvent`]s and produces:
//! - an updated [`PipelineRun`]
//! - a list of commands describing what the IO shell should do next
//!
//! It owns no channels, timers or processes, so every transition can be unit
//! tested by feeding events by hand. The async shell
//! (`engine::runtime::Runtime`) does the waiting.

use std::sync::Arc;

use crate::dag::Pipeline;
use crate::engine::event_handlers::{
    self, CoreStep, handle_cancel, handle_retry_due, handle_task_exit, start,
};
use crate::engine::{RunEvent, ScheduledTask, TaskId};
use crate::errors::Result;
use crate::notify::NotificationPolicy;
use crate::run::PipelineRun;

/// Why a run stopped launching tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Halt {
    /// The task exhausted its retries.
    TaskFailed(TaskId),
    /// A cancellation signal was observed.
    Cancelled,
}

/// State of one Pipeline Run, driven exclusively by [`RunCore::step`].
#[derive(Debug)]
pub struct RunCore {
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) run: PipelineRun,
    pub(crate) policy: NotificationPolicy,
    pub(crate) halt: Option<Halt>,
}

impl RunCore {
    pub fn new(pipeline: Arc<Pipeline>, run: PipelineRun, policy: NotificationPolicy) -> Self {
        Self {
            pipeline,
            run,
            policy,
            halt: None,
        }
    }

    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    pub fn into_run(self) -> PipelineRun {
        self.run
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Whether new tasks may still be launched.
    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    /// Launch the first ready tasks. The run must already be `running`.
    pub fn begin(&mut self) -> Result<CoreStep> {
        start(self)
    }

    /// Handle a single event, returning the commands for the IO shell.
    ///
    /// An `Err` means an executor invariant was broken (for instance a task
    /// about to start before its upstream succeeded); the run must not
    /// continue.
    pub fn step(&mut self, event: RunEvent) -> Result<CoreStep> {
        match event {
            RunEvent::TaskExited {
                task,
                attempt,
                output,
            } => handle_task_exit(self, task, attempt, output),
            RunEvent::RetryDue { task, attempt } => handle_retry_due(self, task, attempt),
            RunEvent::CancelRequested => handle_cancel(self),
        }
    }

    /// Launch `task` directly, bypassing readiness selection.
    ///
    /// Still enforces ordering: fails with `OrderingViolation` if an upstream
    /// task has not succeeded.
    pub fn launch(&mut self, task: &str) -> Result<ScheduledTask> {
        event_handlers::launch(self, task)
    }

    /// Force the run to `failed` after an unrecoverable engine error.
    ///
    /// Returns the cancellations and the `RunFailed` notification the shell
    /// still has to deliver. A terminal run is left untouched.
    pub fn abort(&mut self) -> CoreStep {
        event_handlers::abort(self)
    }
}

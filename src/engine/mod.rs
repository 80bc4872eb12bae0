// src/engine/mod.rs

//! Run execution engine.
//!
//! The per-run state machine lives in [`core`] (pure and synchronous, driven by
//! [`RunEvent`]s); [`event_handlers`] holds the transition logic. The async
//! shell in [`runtime`] feeds it events from the process executor, retry timers
//! and cancellation, and carries out the commands it returns. [`executor`] is
//! the public facade: `start_run` and `execute`.

/// Canonical task identifier type used throughout the engine.
pub type TaskId = String;

/// Outcome of a task process for the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(i32),
}

/// What the process-execution collaborator reports for one invocation.
///
/// Any non-zero `exit_status` is a failure, whatever `stderr` says.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn from_exit_status(exit_status: i32) -> Self {
        Self {
            exit_status,
            ..Self::default()
        }
    }

    /// Output for a command that could not be started or awaited.
    pub fn spawn_failure(message: impl Into<String>) -> Self {
        Self {
            exit_status: -1,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn outcome(&self) -> TaskOutcome {
        if self.success() {
            TaskOutcome::Success
        } else {
            TaskOutcome::Failed(self.exit_status)
        }
    }
}

/// A task attempt the engine wants the executor to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub run_id: String,
    pub task_id: TaskId,
    pub command: String,
    /// 1-based attempt number within the run.
    pub attempt: u32,
}

/// Events flowing into a run's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A launched command exited (or could not be started).
    TaskExited {
        task: TaskId,
        attempt: u32,
        output: CommandOutput,
    },
    /// The retry delay for `task` after failed `attempt` has elapsed.
    RetryDue { task: TaskId, attempt: u32 },
    /// Stop the run: no new task may start.
    CancelRequested,
}

pub mod core;
pub mod event_handlers;
pub mod executor;
pub mod runtime;

pub use core::RunCore;
pub use event_handlers::{CoreCommand, CoreStep};
pub use executor::{ExecutorOptions, PipelineExecutor};
pub use runtime::{RunCanceller, Runtime};

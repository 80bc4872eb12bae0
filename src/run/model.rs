// src/run/model.rs

//! Pipeline Run and Task Instance records.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::dag::Pipeline;
use crate::engine::TaskId;

/// Lifecycle of a Pipeline Run: `queued -> running -> succeeded | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a Task Instance:
/// `pending -> running -> succeeded | failed | up_for_retry -> running ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    UpForRetry,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::UpForRetry => "up_for_retry",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    /// Launched or waiting to be launched again.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskState::Running | TaskState::UpForRetry)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Scheduled,
    Manual,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Scheduled => "scheduled",
            RunKind::Manual => "manual",
        }
    }
}

/// Run id convention: `<kind>__<logical date, RFC 3339>`.
pub fn run_id_for(kind: RunKind, logical_date: DateTime<Utc>) -> String {
    format!(
        "{}__{}",
        kind.as_str(),
        logical_date.to_rfc3339_opts(SecondsFormat::Secs, false)
    )
}

/// One step's execution record within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInstance {
    pub task_id: TaskId,
    pub ordinal: usize,
    pub command: String,
    /// Number of times the command has been launched in this run.
    pub attempts: u32,
    pub state: TaskState,
    pub last_exit_status: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One execution of the whole chain for a logical date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub run_id: String,
    pub pipeline_id: String,
    pub logical_date: DateTime<Utc>,
    pub kind: RunKind,
    pub state: RunState,
    /// In chain order.
    pub tasks: Vec<TaskInstance>,
    /// Set when the run ends `failed`: the task that exhausted its retries or
    /// was interrupted by cancellation.
    pub failed_task: Option<TaskId>,
    /// Cancellation stopped this run. Cleared again if the last task still
    /// succeeded inside the grace period, so it is only ever set on a failed
    /// run.
    pub cancelled: bool,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// New `queued` run with every task `pending`.
    pub fn new(pipeline: &Pipeline, logical_date: DateTime<Utc>, kind: RunKind) -> Self {
        let tasks = pipeline
            .tasks()
            .iter()
            .map(|def| TaskInstance {
                task_id: def.task_id.clone(),
                ordinal: def.ordinal,
                command: def.command.clone(),
                attempts: 0,
                state: TaskState::Pending,
                last_exit_status: None,
                started_at: None,
                ended_at: None,
            })
            .collect();

        Self {
            run_id: run_id_for(kind, logical_date),
            pipeline_id: pipeline.id().to_string(),
            logical_date,
            kind,
            state: RunState::Queued,
            tasks,
            failed_task: None,
            cancelled: false,
            queued_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn task(&self, id: &str) -> Option<&TaskInstance> {
        self.tasks.iter().find(|t| t.task_id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut TaskInstance> {
        self.tasks.iter_mut().find(|t| t.task_id == id)
    }

    pub fn task_state(&self, id: &str) -> Option<TaskState> {
        self.task(id).map(|t| t.state)
    }

    /// `(task_id, state)` pairs in chain order.
    pub fn task_states(&self) -> Vec<(&str, TaskState)> {
        self.tasks
            .iter()
            .map(|t| (t.task_id.as_str(), t.state))
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::PipelineBuilder;
    use chrono::TimeZone;

    #[test]
    fn new_run_is_queued_with_pending_tasks_in_chain_order() {
        let pipeline = PipelineBuilder::new("etl")
            .chain([("unzip", "true"), ("extract", "true")])
            .build()
            .unwrap();
        let date = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();

        let run = PipelineRun::new(&pipeline, date, RunKind::Scheduled);

        assert_eq!(run.run_id, "scheduled__2026-10-18T00:00:00+00:00");
        assert_eq!(run.pipeline_id, "etl");
        assert_eq!(run.state, RunState::Queued);
        assert_eq!(
            run.task_states(),
            vec![("unzip", TaskState::Pending), ("extract", TaskState::Pending)]
        );
        assert!(!run.all_succeeded());
    }

    #[test]
    fn terminal_states() {
        assert!(!RunState::Queued.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Succeeded.is_terminal());
        assert!(RunState::Failed.is_terminal());

        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::UpForRetry.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert_eq!(TaskState::UpForRetry.to_string(), "up_for_retry");
    }
}

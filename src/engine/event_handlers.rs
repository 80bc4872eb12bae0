// src/engine/event_handlers.rs

//! Event handling logic for the run core.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::engine::core::{Halt, RunCore};
use crate::engine::{CommandOutput, ScheduledTask, TaskId};
use crate::errors::{PipelineError, Result};
use crate::notify::{Notification, NotificationEvent};
use crate::run::{RunState, TaskState};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Hand this attempt to the process executor.
    Launch(ScheduledTask),
    /// Deliver `RetryDue { task, attempt }` after `delay`.
    ScheduleRetry {
        task: TaskId,
        attempt: u32,
        delay: Duration,
    },
    /// Ask the executor to stop these running tasks.
    CancelTasks(Vec<TaskId>),
    /// Deliver a notification.
    Notify(Notification),
}

/// Decision returned by the core after handling a single `RunEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn idle() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
        }
    }
}

/// Launch whatever is ready at the start of a run.
pub fn start(core: &mut RunCore) -> Result<CoreStep> {
    if core.run.state != RunState::Running {
        return Err(PipelineError::InvariantViolation(format!(
            "run {} cannot execute from state {}",
            core.run.run_id, core.run.state
        )));
    }

    let mut commands = Vec::new();
    dispatch_ready(core, &mut commands)?;
    let finished = maybe_finish(core, &mut commands)?;

    Ok(CoreStep {
        commands,
        keep_running: !finished,
    })
}

/// Handle a task exit reported by the executor.
pub fn handle_task_exit(
    core: &mut RunCore,
    task: TaskId,
    attempt: u32,
    output: CommandOutput,
) -> Result<CoreStep> {
    let run_id = core.run.run_id.clone();
    let Some(instance) = core.run.task_mut(&task) else {
        warn!(run_id = %run_id, task = %task, "exit reported for unknown task; ignoring");
        return Ok(CoreStep::idle());
    };

    if instance.state != TaskState::Running || instance.attempts != attempt {
        warn!(
            run_id = %run_id,
            task = %task,
            attempt,
            state = %instance.state,
            "stale exit event; ignoring"
        );
        return Ok(CoreStep::idle());
    }

    instance.last_exit_status = Some(output.exit_status);
    instance.ended_at = Some(Utc::now());

    let mut commands = Vec::new();

    if output.success() {
        instance.state = TaskState::Succeeded;
        info!(run_id = %run_id, task = %task, attempt, "task succeeded");
        if core.halt.is_none() {
            dispatch_ready(core, &mut commands)?;
        }
    } else {
        let policy = core
            .pipeline
            .task(&task)
            .map(|def| def.retry_policy)
            .unwrap_or_default();

        if !output.stderr.is_empty() {
            debug!(run_id = %run_id, task = %task, stderr = %output.stderr.trim_end(), "task stderr");
        }

        if core.halt.is_none() && policy.allows_retry(attempt) {
            instance.state = TaskState::UpForRetry;
            warn!(
                run_id = %run_id,
                task = %task,
                attempt,
                exit_status = output.exit_status,
                retry_in = ?policy.delay,
                "task attempt failed; retrying"
            );
            emit(core, &mut commands, NotificationEvent::TaskRetry, Some(&task), attempt);
            commands.push(CoreCommand::ScheduleRetry {
                task,
                attempt,
                delay: policy.delay,
            });
        } else {
            instance.state = TaskState::Failed;
            error!(
                run_id = %run_id,
                task = %task,
                attempt,
                exit_status = output.exit_status,
                "task failed"
            );
            if core.halt.is_none() {
                emit(core, &mut commands, NotificationEvent::TaskFailed, Some(&task), attempt);
                core.halt = Some(Halt::TaskFailed(task));
            }
        }
    }

    let finished = maybe_finish(core, &mut commands)?;
    Ok(CoreStep {
        commands,
        keep_running: !finished,
    })
}

/// Relaunch a task whose retry delay has elapsed.
pub fn handle_retry_due(core: &mut RunCore, task: TaskId, attempt: u32) -> Result<CoreStep> {
    let current = core.run.task(&task).map(|t| (t.state, t.attempts));
    if current != Some((TaskState::UpForRetry, attempt)) || core.halt.is_some() {
        debug!(run_id = %core.run.run_id, task = %task, attempt, "stale retry timer; ignoring");
        return Ok(CoreStep::idle());
    }

    let scheduled = launch(core, &task)?;
    Ok(CoreStep {
        commands: vec![CoreCommand::Launch(scheduled)],
        keep_running: true,
    })
}

/// Stop launching tasks and interrupt whatever is running.
pub fn handle_cancel(core: &mut RunCore) -> Result<CoreStep> {
    if core.run.is_terminal() {
        debug!(run_id = %core.run.run_id, "cancel for finished run; ignoring");
        return Ok(CoreStep {
            commands: Vec::new(),
            keep_running: false,
        });
    }

    if core.halt.is_none() {
        info!(run_id = %core.run.run_id, "cancellation requested");
        core.halt = Some(Halt::Cancelled);
        core.run.cancelled = true;
    }

    let now = Utc::now();
    let mut running = Vec::new();
    for instance in core.run.tasks.iter_mut() {
        match instance.state {
            TaskState::UpForRetry => {
                instance.state = TaskState::Failed;
                instance.ended_at = Some(now);
            }
            TaskState::Running => running.push(instance.task_id.clone()),
            _ => {}
        }
    }

    let mut commands = Vec::new();
    if !running.is_empty() {
        commands.push(CoreCommand::CancelTasks(running));
    }

    let finished = maybe_finish(core, &mut commands)?;
    Ok(CoreStep {
        commands,
        keep_running: !finished,
    })
}

/// Move `task` to `running` and build the attempt for the executor.
///
/// Every upstream task must already be `succeeded`.
pub fn launch(core: &mut RunCore, task: &str) -> Result<ScheduledTask> {
    if core.halt.is_some() {
        return Err(PipelineError::InvariantViolation(format!(
            "run {} is halted; '{task}' must not start",
            core.run.run_id
        )));
    }

    for upstream in core.pipeline.upstream_of(task) {
        if core.run.task_state(upstream) != Some(TaskState::Succeeded) {
            return Err(PipelineError::OrderingViolation {
                task: task.to_string(),
                upstream: upstream.clone(),
            });
        }
    }

    let run_id = core.run.run_id.clone();
    let instance = core
        .run
        .task_mut(task)
        .ok_or_else(|| PipelineError::TaskNotFound(task.to_string()))?;

    if !matches!(instance.state, TaskState::Pending | TaskState::UpForRetry) {
        return Err(PipelineError::InvariantViolation(format!(
            "task '{task}' cannot start from state {}",
            instance.state
        )));
    }

    instance.state = TaskState::Running;
    instance.attempts += 1;
    instance.started_at = Some(Utc::now());
    instance.ended_at = None;

    info!(run_id = %run_id, task = %task, attempt = instance.attempts, "starting task");

    Ok(ScheduledTask {
        run_id,
        task_id: instance.task_id.clone(),
        command: instance.command.clone(),
        attempt: instance.attempts,
    })
}

/// Launch every pending task whose upstream tasks have all succeeded.
fn dispatch_ready(core: &mut RunCore, commands: &mut Vec<CoreCommand>) -> Result<()> {
    let ready: Vec<TaskId> = core
        .run
        .tasks
        .iter()
        .filter(|t| t.state == TaskState::Pending)
        .filter(|t| {
            core.pipeline
                .upstream_of(&t.task_id)
                .iter()
                .all(|up| core.run.task_state(up) == Some(TaskState::Succeeded))
        })
        .map(|t| t.task_id.clone())
        .collect();

    for task in ready {
        let scheduled = launch(core, &task)?;
        commands.push(CoreCommand::Launch(scheduled));
    }
    Ok(())
}

/// Settle the run state if nothing more can happen. Returns `true` once the
/// run is terminal.
fn maybe_finish(core: &mut RunCore, commands: &mut Vec<CoreCommand>) -> Result<bool> {
    if core.run.is_terminal() {
        return Ok(true);
    }

    if core.run.all_succeeded() {
        if core.run.cancelled {
            info!(run_id = %core.run.run_id, "last task finished inside the grace period; cancellation had no effect");
            core.run.cancelled = false;
        }
        core.run.state = RunState::Succeeded;
        core.run.ended_at = Some(Utc::now());
        info!(run_id = %core.run.run_id, "run succeeded");
        return Ok(true);
    }

    let in_flight = core.run.tasks.iter().any(|t| t.state.is_in_flight());

    let Some(halt) = core.halt.clone() else {
        if !in_flight {
            return Err(PipelineError::InvariantViolation(format!(
                "run {} has no runnable task left",
                core.run.run_id
            )));
        }
        return Ok(false);
    };

    if core.run.tasks.iter().any(|t| t.state == TaskState::Running) {
        return Ok(false);
    }

    let now = Utc::now();
    for instance in core.run.tasks.iter_mut() {
        if instance.state == TaskState::UpForRetry {
            instance.state = TaskState::Failed;
            instance.ended_at = Some(now);
        }
    }

    let failed_task = match halt {
        Halt::TaskFailed(task) => Some(task),
        Halt::Cancelled => core
            .run
            .tasks
            .iter()
            .find(|t| t.state != TaskState::Succeeded)
            .map(|t| t.task_id.clone()),
    };
    fail_run(core, commands, failed_task, now);
    Ok(true)
}

/// Force the run to `failed` after an engine error.
///
/// Running tasks are failed and handed back for cancellation, the first task
/// that has not succeeded is blamed, and `RunFailed` is emitted as for any
/// other failed run.
pub fn abort(core: &mut RunCore) -> CoreStep {
    let mut commands = Vec::new();
    if core.run.is_terminal() {
        return CoreStep {
            commands,
            keep_running: false,
        };
    }

    let now = Utc::now();
    let mut running = Vec::new();
    for instance in core.run.tasks.iter_mut() {
        if instance.state == TaskState::Running {
            running.push(instance.task_id.clone());
        }
        if instance.state.is_in_flight() {
            instance.state = TaskState::Failed;
            instance.ended_at = Some(now);
        }
    }
    if !running.is_empty() {
        commands.push(CoreCommand::CancelTasks(running));
    }

    let failed_task = core
        .run
        .tasks
        .iter()
        .find(|t| t.state != TaskState::Succeeded)
        .map(|t| t.task_id.clone());
    fail_run(core, &mut commands, failed_task, now);

    CoreStep {
        commands,
        keep_running: false,
    }
}

fn fail_run(
    core: &mut RunCore,
    commands: &mut Vec<CoreCommand>,
    failed_task: Option<TaskId>,
    now: chrono::DateTime<Utc>,
) {
    let attempt = failed_task
        .as_deref()
        .and_then(|id| core.run.task(id))
        .map(|t| t.attempts)
        .unwrap_or(0);

    core.run.state = RunState::Failed;
    core.run.ended_at = Some(now);
    core.run.failed_task = failed_task.clone();

    error!(
        run_id = %core.run.run_id,
        failed_task = failed_task.as_deref().unwrap_or("-"),
        cancelled = core.run.cancelled,
        "run failed"
    );
    emit(
        core,
        commands,
        NotificationEvent::RunFailed,
        failed_task.as_deref(),
        attempt,
    );
}

fn emit(
    core: &RunCore,
    commands: &mut Vec<CoreCommand>,
    event: NotificationEvent,
    task: Option<&str>,
    attempt: u32,
) {
    if !core.policy.allows(event) {
        return;
    }
    commands.push(CoreCommand::Notify(Notification {
        event,
        run_id: core.run.run_id.clone(),
        task_id: task.map(str::to_string),
        attempt,
    }));
}

// src/exec/executor_loop.rs

//! Main executor loop that manages running task processes.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::{RunEvent, ScheduledTask, TaskId};
use crate::exec::task_runner::run_task;
use crate::types::CancelGrace;

/// Request sent from `RealExecutorBackend` to the executor loop.
#[derive(Debug)]
pub enum ExecRequest {
    Launch(ScheduledTask),
    Cancel(TaskId),
}

/// Internal handle for a currently-running task process.
///
/// - `cancel` is used to ask the runner to stop the process (run
///   cancellation); it is consumed on first use.
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveTask {
    attempt: u32,
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop for one run.
///
/// Each launched attempt is executed in its own Tokio task and reports
/// `RunEvent::TaskExited` on `runtime_tx` when the process ends.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RunEvent>,
    cancel_grace: CancelGrace,
) -> mpsc::Sender<ExecRequest> {
    let (tx, mut rx) = mpsc::channel::<ExecRequest>(32);

    tokio::spawn(async move {
        debug!("executor loop started");

        // At most one live attempt per task.
        let mut active: HashMap<TaskId, ActiveTask> = HashMap::new();

        while let Some(request) = rx.recv().await {
            active.retain(|_, t| !t.handle.is_finished());
            match request {
                ExecRequest::Launch(task) => {
                    launch_task(task, &mut active, &runtime_tx, cancel_grace)
                }
                ExecRequest::Cancel(task) => cancel_task(&task, &mut active),
            }
        }

        debug!("executor loop finished (channel closed)");
    });

    tx
}

fn launch_task(
    task: ScheduledTask,
    active: &mut HashMap<TaskId, ActiveTask>,
    runtime_tx: &mpsc::Sender<RunEvent>,
    cancel_grace: CancelGrace,
) {
    let name = task.task_id.clone();

    if let Some(previous) = active.get(&name) {
        // The previous attempt already reported its exit (the engine only
        // relaunches after that); its runner is just winding down.
        debug!(
            task = %name,
            previous_attempt = previous.attempt,
            attempt = task.attempt,
            "replacing finished attempt handle"
        );
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();
    let attempt = task.attempt;
    let spawn_name = name.clone();

    let handle = tokio::spawn(async move {
        run_task(task, rt_tx, cancel_rx, cancel_grace).await;
        debug!(task = %spawn_name, attempt, "task runner future finished");
    });

    active.insert(
        name,
        ActiveTask {
            attempt,
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_task(task: &str, active: &mut HashMap<TaskId, ActiveTask>) {
    let Some(existing) = active.get_mut(task) else {
        debug!(task = %task, "cancel requested but no process is running");
        return;
    };

    info!(
        task = %task,
        attempt = existing.attempt,
        "run cancelled; stopping running process"
    );

    match existing.cancel.take() {
        Some(cancel) => {
            if cancel.send(()).is_err() {
                debug!(task = %task, "process already finished while cancelling");
            }
        }
        None => debug!(task = %task, "process was already asked to stop"),
    }
}

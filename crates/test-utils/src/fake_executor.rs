use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use chainrun::engine::{CommandOutput, RunEvent, ScheduledTask, TaskId};
use chainrun::errors::Result;
use chainrun::exec::ExecutorBackend;

/// Exit codes per task, one per attempt. Attempts beyond the script exit 0.
#[derive(Debug, Clone, Default)]
pub struct Script {
    exits: HashMap<String, Vec<i32>>,
    refused: Option<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt `n` (1-based) of `task` exits with `codes[n - 1]`.
    pub fn task(mut self, task: &str, codes: &[i32]) -> Self {
        self.exits.insert(task.to_string(), codes.to_vec());
        self
    }

    /// The backend errors out instead of launching `task`, as if the process
    /// executor had gone away.
    pub fn refuse_launch(mut self, task: &str) -> Self {
        self.refused = Some(task.to_string());
        self
    }

    pub fn refuses(&self, task: &str) -> bool {
        self.refused.as_deref() == Some(task)
    }

    pub fn exit_for(&self, task: &str, attempt: u32) -> i32 {
        self.exits
            .get(task)
            .and_then(|codes| codes.get(attempt as usize - 1))
            .copied()
            .unwrap_or(0)
    }
}

/// Shared log of `(task, attempt)` launches, in launch order.
pub type Launches = Arc<Mutex<Vec<(TaskId, u32)>>>;

/// A fake executor that:
/// - records which attempts were launched
/// - immediately reports `TaskExited` with the scripted exit code
/// - fails the launch itself for a refused task.
pub struct ScriptedExecutor {
    runtime_tx: mpsc::Sender<RunEvent>,
    script: Script,
    launches: Launches,
}

impl ScriptedExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RunEvent>, script: Script, launches: Launches) -> Self {
        Self {
            runtime_tx,
            script,
            launches,
        }
    }
}

impl ExecutorBackend for ScriptedExecutor {
    fn launch(
        &mut self,
        task: ScheduledTask,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let launches = Arc::clone(&self.launches);
        let exit_status = self.script.exit_for(&task.task_id, task.attempt);
        let refused = self.script.refuses(&task.task_id);

        Box::pin(async move {
            {
                let mut guard = launches.lock().unwrap();
                guard.push((task.task_id.clone(), task.attempt));
            }
            if refused {
                return Err(anyhow::anyhow!("executor gone").into());
            }

            tx.send(RunEvent::TaskExited {
                task: task.task_id,
                attempt: task.attempt,
                output: CommandOutput::from_exit_status(exit_status),
            })
            .await
            .map_err(anyhow::Error::from)?;
            Ok(())
        })
    }
}

/// A fake executor whose attempts never exit on their own.
///
/// `cancel` answers with exit status `-1`, like a killed process. Used to
/// observe a run while a task is still running.
pub struct HangingExecutor {
    runtime_tx: mpsc::Sender<RunEvent>,
    running: HashMap<TaskId, u32>,
    launches: Launches,
}

impl HangingExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RunEvent>, launches: Launches) -> Self {
        Self {
            runtime_tx,
            running: HashMap::new(),
            launches,
        }
    }
}

impl ExecutorBackend for HangingExecutor {
    fn launch(
        &mut self,
        task: ScheduledTask,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.launches
            .lock()
            .unwrap()
            .push((task.task_id.clone(), task.attempt));
        self.running.insert(task.task_id, task.attempt);
        Box::pin(async { Ok(()) })
    }

    fn cancel(&mut self, task: TaskId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let attempt = self.running.remove(&task);

        Box::pin(async move {
            if let Some(attempt) = attempt {
                tx.send(RunEvent::TaskExited {
                    task,
                    attempt,
                    output: CommandOutput::from_exit_status(-1),
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}

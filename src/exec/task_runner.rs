// src/exec/task_runner.rs

//! Individual task process runner.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{CommandOutput, RunEvent, ScheduledTask};
use crate::types::CancelGrace;

/// Captured output per stream is truncated beyond this many bytes.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

const COLLECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a single task attempt and report `TaskExited` for it.
///
/// Exactly one exit event is sent per attempt, including when the process
/// could not be spawned (exit status `-1`) or was killed on cancellation.
pub async fn run_task(
    task: ScheduledTask,
    runtime_tx: mpsc::Sender<RunEvent>,
    cancel_rx: oneshot::Receiver<()>,
    cancel_grace: CancelGrace,
) {
    let output = match run_task_inner(&task, cancel_rx, cancel_grace).await {
        Ok(output) => output,
        Err(err) => {
            error!(
                task = %task.task_id,
                run_id = %task.run_id,
                attempt = task.attempt,
                error = %err,
                "task execution error"
            );
            CommandOutput::spawn_failure(format!("{err:#}"))
        }
    };

    let event = RunEvent::TaskExited {
        task: task.task_id.clone(),
        attempt: task.attempt,
        output,
    };
    if runtime_tx.send(event).await.is_err() {
        debug!(task = %task.task_id, "runtime gone; dropping exit event");
    }
}

/// Build a shell command appropriate for the platform.
pub fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    }
}

async fn run_task_inner(
    task: &ScheduledTask,
    mut cancel_rx: oneshot::Receiver<()>,
    cancel_grace: CancelGrace,
) -> Result<CommandOutput> {
    info!(
        task = %task.task_id,
        run_id = %task.run_id,
        attempt = task.attempt,
        cmd = %task.command,
        "starting task process"
    );

    let mut cmd = shell_command(&task.command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.task_id))?;

    // Always consume both pipes so buffers don't fill; log at debug.
    let stdout = child
        .stdout
        .take()
        .map(|out| spawn_capture(task, "stdout", out));
    let stderr = child
        .stderr
        .take()
        .map(|err| spawn_capture(task, "stderr", err));

    // Either the process exits on its own (normal case), or the run is
    // cancelled and the grace policy decides how long we keep waiting.
    let status = tokio::select! {
        status_res = child.wait() => status_res.with_context(|| {
            format!("waiting for process of task '{}'", task.task_id)
        })?,

        cancel = &mut cancel_rx => match cancel {
            Ok(()) => wait_with_grace(&mut child, task, cancel_grace).await?,
            Err(_) => {
                // Sender dropped without a request: nobody can cancel us now.
                child.wait().await.with_context(|| {
                    format!("waiting for process of task '{}'", task.task_id)
                })?
            }
        },
    };

    let code = status.code().unwrap_or(-1);
    info!(
        task = %task.task_id,
        run_id = %task.run_id,
        attempt = task.attempt,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    Ok(CommandOutput {
        exit_status: code,
        stdout: collect(task, stdout).await,
        stderr: collect(task, stderr).await,
    })
}

async fn wait_with_grace(
    child: &mut Child,
    task: &ScheduledTask,
    cancel_grace: CancelGrace,
) -> Result<ExitStatus> {
    match cancel_grace {
        CancelGrace::WaitForExit => {
            info!(
                task = %task.task_id,
                run_id = %task.run_id,
                "run cancelled; letting running command finish"
            );
            child
                .wait()
                .await
                .with_context(|| format!("waiting for process of task '{}'", task.task_id))
        }
        CancelGrace::KillAfter(grace) => {
            info!(
                task = %task.task_id,
                run_id = %task.run_id,
                ?grace,
                "run cancelled; waiting for command to exit before killing it"
            );
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status
                    .with_context(|| format!("waiting for process of task '{}'", task.task_id)),
                Err(_elapsed) => {
                    info!(
                        task = %task.task_id,
                        run_id = %task.run_id,
                        "grace period elapsed; killing process"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(
                            task = %task.task_id,
                            run_id = %task.run_id,
                            error = %e,
                            "failed to kill child process on cancellation"
                        );
                    }
                    child
                        .wait()
                        .await
                        .with_context(|| format!("reaping process of task '{}'", task.task_id))
                }
            }
        }
    }
}

fn spawn_capture<R>(task: &ScheduledTask, stream: &'static str, reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let task_name = task.task_id.clone();
    let attempt = task.attempt;

    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut captured = String::new();
        let mut truncated = false;

        // Drain to EOF whatever the content, so the child never sees a closed pipe.
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(task = %task_name, attempt, error = %e, "failed reading {stream}");
                    break;
                }
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            debug!(task = %task_name, attempt, "{stream}: {line}");
            if captured.len() + line.len() < MAX_CAPTURE_BYTES {
                captured.push_str(line);
                captured.push('\n');
            } else if !truncated {
                truncated = true;
                captured.push_str("[output truncated]\n");
            }
        }
        captured
    })
}

/// Background processes started by the command may keep the pipe open after
/// the command itself exited; stop waiting for them after a bound.
async fn collect(task: &ScheduledTask, handle: Option<JoinHandle<String>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(COLLECT_TIMEOUT, &mut handle).await {
        Ok(captured) => captured.unwrap_or_default(),
        Err(_elapsed) => {
            warn!(task = %task.task_id, "output pipe still open after exit; discarding capture");
            handle.abort();
            String::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn scheduled(command: &str) -> ScheduledTask {
        ScheduledTask {
            run_id: "manual__2026-10-18T00:00:00+00:00".into(),
            task_id: "t".into(),
            command: command.into(),
            attempt: 1,
        }
    }

    async fn exit_of(command: &str, grace: CancelGrace, cancel: bool) -> CommandOutput {
        let (tx, mut rx) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let runner = tokio::spawn(run_task(scheduled(command), tx, cancel_rx, grace));
        if cancel {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_tx.send(()).unwrap();
        } else {
            drop(cancel_tx);
        }
        runner.await.unwrap();
        match rx.recv().await {
            Some(RunEvent::TaskExited { output, attempt, .. }) => {
                assert_eq!(attempt, 1);
                output
            }
            other => panic!("expected TaskExited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn captures_output_and_exit_status() {
        let output = exit_of("echo hello; echo oops >&2; exit 3", CancelGrace::default(), false).await;
        assert_eq!(output.exit_status, 3);
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn stderr_alone_does_not_fail_a_task() {
        let output = exit_of("echo warning >&2", CancelGrace::default(), false).await;
        assert!(output.success());
    }

    #[tokio::test]
    async fn cancel_kills_after_grace() {
        let grace = CancelGrace::KillAfter(Duration::from_millis(50));
        let output = exit_of("exec sleep 30", grace, true).await;
        assert!(!output.success());
    }

    #[tokio::test]
    async fn cancel_with_wait_lets_command_finish() {
        let output = exit_of("sleep 0.3; exit 0", CancelGrace::WaitForExit, true).await;
        assert!(output.success());
    }

    #[tokio::test]
    async fn invalid_utf8_output_does_not_break_the_pipe() {
        let output = exit_of(
            "printf '\\377\\n'; sleep 0.3; echo after; exit 0",
            CancelGrace::default(),
            false,
        )
        .await;
        assert_eq!(output.exit_status, 0);
        assert_eq!(output.stdout, "\u{FFFD}\nafter\n");
    }

    #[tokio::test]
    async fn output_past_the_capture_limit_is_drained() {
        // ~200 KiB of stdout, well past the capture limit.
        let output = exit_of(
            "i=0; while [ $i -lt 4000 ]; do printf '%050d\\n' $i; i=$((i+1)); done; exit 0",
            CancelGrace::default(),
            false,
        )
        .await;
        assert_eq!(output.exit_status, 0);
        assert!(output.stdout.ends_with("[output truncated]\n"));
        assert!(output.stdout.len() <= MAX_CAPTURE_BYTES + 64);
    }
}

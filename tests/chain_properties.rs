// tests/chain_properties.rs

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chainrun::dag::{PipelineBuilder, RetryPolicy};
use chainrun::engine::{CommandOutput, CoreCommand, RunCore, RunEvent};
use chainrun::notify::{NotificationEvent, NotificationPolicy};
use chainrun::run::{PipelineRun, RunKind, RunState, TaskState};
use chainrun_test_utils::day;
use proptest::prelude::*;

struct Outcome {
    run: PipelineRun,
    launches: Vec<(String, u32)>,
    notifications: Vec<NotificationEvent>,
}

/// Drive the core synchronously: every launch exits immediately and every
/// retry timer fires at once. Task `i` fails its first `failures[i]` attempts.
fn drive(failures: &[u32], max_retries: u32) -> Outcome {
    let ids: Vec<String> = (0..failures.len()).map(|i| format!("task_{i}")).collect();
    let steps: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "true")).collect();
    let pipeline = Arc::new(
        PipelineBuilder::new("prop")
            .default_retry_policy(RetryPolicy::new(max_retries, Duration::from_secs(1)))
            .chain(steps)
            .build()
            .unwrap(),
    );

    let mut run = PipelineRun::new(&pipeline, day(2026, 10, 18), RunKind::Scheduled);
    run.state = RunState::Running;
    let mut core = RunCore::new(pipeline, run, NotificationPolicy::default());

    let mut queue: VecDeque<CoreCommand> = core.begin().unwrap().commands.into();
    let mut launches = Vec::new();
    let mut notifications = Vec::new();

    while let Some(command) = queue.pop_front() {
        let step = match command {
            CoreCommand::Launch(task) => {
                let index = ids.iter().position(|id| *id == task.task_id).unwrap();
                if index > 0 {
                    // Predecessor already succeeded when the successor starts.
                    assert_eq!(core.run().task_state(&ids[index - 1]), Some(TaskState::Succeeded));
                }
                launches.push((task.task_id.clone(), task.attempt));
                let exit = if task.attempt <= failures[index] { 1 } else { 0 };
                core.step(RunEvent::TaskExited {
                    task: task.task_id,
                    attempt: task.attempt,
                    output: CommandOutput::from_exit_status(exit),
                })
            }
            CoreCommand::ScheduleRetry { task, attempt, .. } => {
                core.step(RunEvent::RetryDue { task, attempt })
            }
            CoreCommand::Notify(n) => {
                notifications.push(n.event);
                continue;
            }
            CoreCommand::CancelTasks(_) => unreachable!("nothing cancels in this model"),
        };
        queue.extend(step.unwrap().commands);
    }

    Outcome {
        run: core.into_run(),
        launches,
        notifications,
    }
}

proptest! {
    #[test]
    fn chain_invariants_hold(
        failures in proptest::collection::vec(0u32..4, 1..8),
        max_retries in 0u32..3,
    ) {
        let outcome = drive(&failures, max_retries);
        let run = &outcome.run;

        prop_assert!(run.is_terminal());

        // Launch order never goes backwards in the chain.
        let ordinals: Vec<usize> = outcome
            .launches
            .iter()
            .map(|(id, _)| run.task(id).unwrap().ordinal)
            .collect();
        prop_assert!(ordinals.windows(2).all(|w| w[0] <= w[1]));

        for task in &run.tasks {
            prop_assert!(task.attempts <= max_retries + 1);
        }

        match failures.iter().position(|&f| f > max_retries) {
            None => {
                prop_assert_eq!(run.state, RunState::Succeeded);
                prop_assert!(outcome.notifications.is_empty());
                for (task, &f) in run.tasks.iter().zip(&failures) {
                    prop_assert_eq!(task.attempts, f + 1);
                }
            }
            Some(first_bad) => {
                prop_assert_eq!(run.state, RunState::Failed);
                let failed_id = format!("task_{first_bad}");
                prop_assert_eq!(run.failed_task.as_deref(), Some(failed_id.as_str()));
                prop_assert_eq!(run.tasks[first_bad].state, TaskState::Failed);
                prop_assert_eq!(run.tasks[first_bad].attempts, max_retries + 1);
                for later in &run.tasks[first_bad + 1..] {
                    prop_assert_eq!(later.state, TaskState::Pending);
                    prop_assert_eq!(later.attempts, 0);
                }
                let run_failed = outcome
                    .notifications
                    .iter()
                    .filter(|e| **e == NotificationEvent::RunFailed)
                    .count();
                prop_assert_eq!(run_failed, 1);
            }
        }
    }
}

// tests/engine_abort.rs

use chainrun::notify::NotificationEvent;
use chainrun::run::{RunState, TaskState};
use chainrun_test_utils::builders::ConfigFileBuilder;
use chainrun_test_utils::fake_executor::{Launches, Script, ScriptedExecutor};
use chainrun_test_utils::{RecordingNotifier, day, executor_for, init_tracing};

#[tokio::test]
async fn refused_launch_fails_the_run_and_still_notifies() {
    init_tracing();

    let cfg = ConfigFileBuilder::new("p")
        .with_chain(&[("a", "a.sh"), ("b", "b.sh"), ("c", "c.sh")])
        .build();
    let notifier = RecordingNotifier::new();
    let executor = executor_for(&cfg, &notifier);
    let script = Script::new().refuse_launch("b");

    let run = executor.start_run(day(2026, 10, 18)).unwrap();
    let result = executor
        .execute_with(run, |tx| ScriptedExecutor::new(tx, script, Launches::default()))
        .await;

    let err = result.expect_err("a refused launch is an engine error");
    assert!(err.to_string().contains("executor gone"), "{err}");

    let recorded = executor.registry().get(day(2026, 10, 18)).unwrap();
    assert_eq!(recorded.state, RunState::Failed);
    assert!(!recorded.cancelled);
    assert_eq!(recorded.failed_task.as_deref(), Some("b"));
    assert_eq!(
        recorded.task_states(),
        vec![
            ("a", TaskState::Succeeded),
            ("b", TaskState::Failed),
            ("c", TaskState::Pending),
        ]
    );

    let sent = notifier.sent();
    assert_eq!(notifier.count(NotificationEvent::RunFailed), 1);
    let run_failed = sent
        .iter()
        .find(|n| n.event == NotificationEvent::RunFailed)
        .unwrap();
    assert_eq!(run_failed.task_id.as_deref(), Some("b"));
    assert_eq!(run_failed.attempt, 1);
}

#[tokio::test]
async fn refused_first_launch_blames_the_root_task() {
    init_tracing();

    let cfg = ConfigFileBuilder::new("p")
        .with_chain(&[("a", "a.sh"), ("b", "b.sh")])
        .build();
    let notifier = RecordingNotifier::new();
    let executor = executor_for(&cfg, &notifier);
    let script = Script::new().refuse_launch("a");

    let run = executor.start_run(day(2026, 10, 18)).unwrap();
    let result = executor
        .execute_with(run, |tx| ScriptedExecutor::new(tx, script, Launches::default()))
        .await;

    assert!(result.is_err());
    let recorded = executor.registry().get(day(2026, 10, 18)).unwrap();
    assert_eq!(recorded.failed_task.as_deref(), Some("a"));
    assert_eq!(recorded.task_state("a"), Some(TaskState::Failed));
    assert_eq!(notifier.count(NotificationEvent::RunFailed), 1);
}

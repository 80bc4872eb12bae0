// tests/toll_pipeline.rs

use std::error::Error;
use std::time::Duration;

use chainrun::config::ConfigFile;
use chainrun::errors::PipelineError;
use chainrun::notify::NotificationEvent;
use chainrun::run::{RunState, TaskState};
use chainrun_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use chainrun_test_utils::fake_executor::{Launches, Script, ScriptedExecutor};
use chainrun_test_utils::{RecordingNotifier, day, executor_for, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

const TOLL_CHAIN: &[(&str, &str)] = &[
    ("unzip_data", "tar -xvzf tolldata.tgz"),
    ("extract_data_from_csv", "cut -d\",\" -f1,2,3,4 vehicle-data.csv > csv_data.csv"),
    ("extract_data_from_tsv", "cut -f5,6,7 tollplaza-data.tsv > tsv_data.csv"),
    ("extract_data_from_fixed_width", "cut -c44-66,67-89 payment-data.txt > fixed_width_data.csv"),
    ("consolidate_data", "paste -d\",\" csv_data.csv tsv_data.csv fixed_width_data.csv > extracted_data.csv"),
    ("transform_data", "awk -F\",\" '{OFS=\",\"; $4=toupper($4); print}' extracted_data.csv > transformed_data.csv"),
];

fn toll_config() -> ConfigFile {
    ConfigFileBuilder::new("ETL_toll_data")
        .with_chain(TOLL_CHAIN)
        .with_owner("batman", "batman@gotham.com")
        .with_retries(1, "5m")
        .with_notifications(true, true)
        .build()
}

fn attempts(launches: &Launches) -> Vec<(String, u32)> {
    launches.lock().unwrap().clone()
}

#[tokio::test(start_paused = true)]
async fn tsv_extraction_failing_twice_fails_the_run() -> TestResult {
    init_tracing();

    let cfg = toll_config();
    let notifier = RecordingNotifier::new();
    let executor = executor_for(&cfg, &notifier);
    let launches = Launches::default();
    let script = Script::new().task("extract_data_from_tsv", &[1, 1]);

    let date = day(2026, 10, 18);
    let run = executor.start_run(date)?;
    let started = tokio::time::Instant::now();
    let run = executor
        .execute_with(run, |tx| ScriptedExecutor::new(tx, script, launches.clone()))
        .await?;

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.failed_task.as_deref(), Some("extract_data_from_tsv"));
    assert!(!run.cancelled);

    // The retry waited out its delay before relaunching.
    assert!(started.elapsed() >= Duration::from_secs(300));

    assert_eq!(
        attempts(&launches),
        vec![
            ("unzip_data".to_string(), 1),
            ("extract_data_from_csv".to_string(), 1),
            ("extract_data_from_tsv".to_string(), 1),
            ("extract_data_from_tsv".to_string(), 2),
        ]
    );

    assert_eq!(
        run.task_states(),
        vec![
            ("unzip_data", TaskState::Succeeded),
            ("extract_data_from_csv", TaskState::Succeeded),
            ("extract_data_from_tsv", TaskState::Failed),
            ("extract_data_from_fixed_width", TaskState::Pending),
            ("consolidate_data", TaskState::Pending),
            ("transform_data", TaskState::Pending),
        ]
    );
    let tsv = run.task("extract_data_from_tsv").unwrap();
    assert_eq!(tsv.attempts, 2);
    assert_eq!(tsv.last_exit_status, Some(1));
    assert_eq!(run.task("consolidate_data").unwrap().attempts, 0);

    let sent = notifier.sent();
    let events: Vec<_> = sent.iter().map(|n| (n.event, n.attempt)).collect();
    assert_eq!(
        events,
        vec![
            (NotificationEvent::TaskRetry, 1),
            (NotificationEvent::TaskFailed, 2),
            (NotificationEvent::RunFailed, 2),
        ]
    );
    let run_failed = sent
        .iter()
        .find(|n| n.event == NotificationEvent::RunFailed)
        .unwrap();
    assert_eq!(run_failed.run_id, "scheduled__2026-10-18T00:00:00+00:00");
    assert_eq!(run_failed.task_id.as_deref(), Some("extract_data_from_tsv"));
    assert_eq!(notifier.count(NotificationEvent::RunFailed), 1);

    // The registry keeps the terminal snapshot.
    let recorded = executor.registry().get(date).unwrap();
    assert_eq!(recorded.state, RunState::Failed);
    assert_eq!(recorded.failed_task.as_deref(), Some("extract_data_from_tsv"));

    Ok(())
}

#[tokio::test]
async fn all_tasks_succeed_first_time() -> TestResult {
    init_tracing();

    let cfg = toll_config();
    let notifier = RecordingNotifier::new();
    let executor = executor_for(&cfg, &notifier);
    let launches = Launches::default();

    let run = executor.start_run(day(2026, 10, 18))?;
    let run = executor
        .execute_with(run, |tx| ScriptedExecutor::new(tx, Script::new(), launches.clone()))
        .await?;

    assert_eq!(run.state, RunState::Succeeded);
    assert!(run.failed_task.is_none());
    assert!(run.ended_at.is_some());
    assert!(run.tasks.iter().all(|t| t.attempts == 1 && t.state == TaskState::Succeeded));

    let order: Vec<String> = attempts(&launches).into_iter().map(|(t, _)| t).collect();
    let expected: Vec<String> = TOLL_CHAIN.iter().map(|(id, _)| id.to_string()).collect();
    assert_eq!(order, expected);

    assert!(notifier.sent().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_that_succeeds_only_sends_retry_notice() -> TestResult {
    init_tracing();

    let cfg = toll_config();
    let notifier = RecordingNotifier::new();
    let executor = executor_for(&cfg, &notifier);
    let launches = Launches::default();
    let script = Script::new().task("consolidate_data", &[2]);

    let run = executor.start_run(day(2026, 10, 18))?;
    let run = executor
        .execute_with(run, |tx| ScriptedExecutor::new(tx, script, launches.clone()))
        .await?;

    assert_eq!(run.state, RunState::Succeeded);
    assert_eq!(run.task("consolidate_data").unwrap().attempts, 2);
    assert_eq!(attempts(&launches).len(), TOLL_CHAIN.len() + 1);
    assert_eq!(notifier.count(NotificationEvent::TaskRetry), 1);
    assert_eq!(notifier.count(NotificationEvent::TaskFailed), 0);
    assert_eq!(notifier.count(NotificationEvent::RunFailed), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn run_failure_is_notified_even_with_email_flags_off() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new("ETL_toll_data")
        .with_chain(TOLL_CHAIN)
        .with_retries(1, "5m")
        .with_notifications(false, false)
        .build();
    let notifier = RecordingNotifier::new();
    let executor = executor_for(&cfg, &notifier);
    let script = Script::new().task("unzip_data", &[1, 1]);

    let run = executor.start_run(day(2026, 10, 18))?;
    let run = executor
        .execute_with(run, |tx| ScriptedExecutor::new(tx, script, Launches::default()))
        .await?;

    assert_eq!(run.state, RunState::Failed);
    let events: Vec<_> = notifier.sent().iter().map(|n| n.event).collect();
    assert_eq!(events, vec![NotificationEvent::RunFailed]);
    Ok(())
}

#[tokio::test]
async fn task_level_retry_override_is_honoured() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new("p")
        .with_retries(3, "1s")
        .with_task("first", TaskConfigBuilder::new("true").build())
        .with_task(
            "second",
            TaskConfigBuilder::new("false").after("first").retries(0).build(),
        )
        .build();
    let notifier = RecordingNotifier::new();
    let executor = executor_for(&cfg, &notifier);
    let script = Script::new().task("second", &[1]);

    let run = executor.start_run(day(2026, 10, 18))?;
    let run = executor
        .execute_with(run, |tx| ScriptedExecutor::new(tx, script, Launches::default()))
        .await?;

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.task("second").unwrap().attempts, 1);
    Ok(())
}

#[tokio::test]
async fn re_running_a_succeeded_date_executes_everything_again() -> TestResult {
    init_tracing();

    let cfg = toll_config();
    let notifier = RecordingNotifier::new();
    let executor = executor_for(&cfg, &notifier);
    let launches = Launches::default();
    let date = day(2026, 10, 18);

    let first = executor.start_run(date)?;
    let first = executor
        .execute_with(first, |tx| ScriptedExecutor::new(tx, Script::new(), launches.clone()))
        .await?;

    let second = executor.start_run(date)?;
    assert_eq!(second.state, RunState::Running);
    assert!(second.tasks.iter().all(|t| t.state == TaskState::Pending && t.attempts == 0));

    let second = executor
        .execute_with(second, |tx| ScriptedExecutor::new(tx, Script::new(), launches.clone()))
        .await?;

    assert_eq!(first.state, RunState::Succeeded);
    assert_eq!(second.state, RunState::Succeeded);
    assert_eq!(first.run_id, second.run_id);
    assert_eq!(first.task_states(), second.task_states());
    assert_eq!(attempts(&launches).len(), 2 * TOLL_CHAIN.len());
    Ok(())
}

#[test]
fn live_run_blocks_a_second_start_for_the_same_date() -> TestResult {
    let cfg = toll_config();
    let executor = executor_for(&cfg, &RecordingNotifier::new());
    let date = day(2026, 10, 18);

    executor.start_run(date)?;
    match executor.start_run(date) {
        Err(PipelineError::DuplicateRun(msg)) => assert!(msg.contains("2026-10-18"), "{msg}"),
        other => panic!("expected DuplicateRun, got {other:?}"),
    }

    // Another logical date is independent.
    executor.start_run(day(2026, 10, 19))?;
    assert_eq!(executor.registry().active_count(), 2);
    Ok(())
}

#[test]
fn manual_runs_use_their_own_run_id() -> TestResult {
    let cfg = toll_config();
    let executor = executor_for(&cfg, &RecordingNotifier::new());

    let run = executor.start_manual_run(day(2026, 10, 18))?;
    assert_eq!(run.run_id, "manual__2026-10-18T00:00:00+00:00");
    assert_eq!(run.pipeline_id, "ETL_toll_data");
    Ok(())
}

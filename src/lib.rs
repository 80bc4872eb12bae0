// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod notify;
pub mod run;
pub mod trigger;
pub mod types;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::ConfigFile;
use crate::config::loader::load_and_validate;
use crate::dag::Pipeline;
use crate::engine::PipelineExecutor;
use crate::errors::PipelineError;
use crate::exec::RealExecutorBackend;
use crate::run::{PipelineRun, RunState};
use crate::trigger::ScheduleDriver;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and pipeline construction
/// - a single manual run (`--date`), the due scheduled runs (`--once`), or
///   the schedule driver until Ctrl-C
/// - Ctrl-C handling (cancels active runs)
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let executor = PipelineExecutor::from_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg, executor.pipeline());
        return Ok(());
    }

    if let Some(date) = args.date {
        let run = run_manual(&executor, date).await?;
        return ensure_succeeded(&run);
    }

    let driver = ScheduleDriver::new(executor, &cfg.pipeline);

    if args.once {
        let mut failure = None;
        for result in driver.run_once(Utc::now()).await {
            let run = result?;
            print_run_summary(&run);
            if failure.is_none() {
                failure = ensure_succeeded(&run).err();
            }
        }
        return failure.map_or(Ok(()), Err);
    }

    info!(
        pipeline = %cfg.pipeline.id,
        schedule = %cfg.pipeline.schedule,
        catchup = cfg.pipeline.catchup,
        "schedule driver started"
    );
    driver.run_until(shutdown_signal()).await?;
    Ok(())
}

/// Start and execute one manual run; Ctrl-C cancels it.
async fn run_manual(executor: &PipelineExecutor, date: DateTime<Utc>) -> Result<PipelineRun> {
    let run = executor.start_manual_run(date)?;
    let grace = executor.options().cancel_grace;
    let runtime = executor.runtime(run, |tx| RealExecutorBackend::new(tx, grace));

    // Ctrl-C → cancel the run; the runtime still waits for it to settle.
    let canceller = runtime.canceller();
    let ctrl_c = tokio::spawn(async move {
        shutdown_signal().await;
        canceller.cancel().await;
    });

    let result = runtime.run().await;
    ctrl_c.abort();

    let run = result?;
    print_run_summary(&run);
    Ok(run)
}

fn ensure_succeeded(run: &PipelineRun) -> Result<()> {
    match run.state {
        RunState::Succeeded => Ok(()),
        _ => Err(PipelineError::RunFailed {
            run_id: run.run_id.clone(),
            task: run.failed_task.clone(),
        }
        .into()),
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received"),
        Err(e) => {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

fn print_run_summary(run: &PipelineRun) {
    let cancelled = if run.cancelled { " (cancelled)" } else { "" };
    println!("{} {}{}", run.run_id, run.state, cancelled);
    for task in &run.tasks {
        println!(
            "  {:<32} {:<13} attempts={}",
            task.task_id, task.state, task.attempts
        );
    }
}

/// Simple dry-run output: print settings and the chain in execution order.
fn print_dry_run(cfg: &ConfigFile, pipeline: &Pipeline) {
    let settings = &cfg.pipeline;
    println!("chainrun dry-run: {}", pipeline.id());
    if let Some(description) = pipeline.description() {
        println!("  description = {description}");
    }
    println!("  schedule = {}", settings.schedule);
    println!("  start_date = {}", settings.start_date.to_rfc3339());
    println!("  catchup = {}", settings.catchup);
    println!("  max_active_runs = {}", settings.max_active_runs);
    println!("  cancel_grace = {:?}", settings.cancel_grace);
    println!();

    println!("tasks ({}):", pipeline.tasks().len());
    for task in pipeline.tasks() {
        println!("  {}. {}", task.ordinal + 1, task.task_id);
        println!("      cmd: {}", task.command);
        let upstream = pipeline.upstream_of(&task.task_id);
        if !upstream.is_empty() {
            println!("      after: {upstream:?}");
        }
        println!(
            "      retries: {} (delay {:?})",
            task.retry_policy.max_retries, task.retry_policy.delay
        );
    }

    debug!("dry-run complete (no execution)");
}

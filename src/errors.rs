// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::engine::TaskId;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected in pipeline: {0}")]
    DagCycle(String),

    #[error("Pipeline is not a linear chain: {0}")]
    NotAChain(String),

    #[error("Invalid retry policy for task '{task}': {reason}")]
    InvalidRetryPolicy { task: TaskId, reason: String },

    /// A task was about to start while one of its upstream tasks had not
    /// succeeded. This is a bug in the executor, never a task failure.
    #[error("Ordering violation: task '{task}' started before upstream '{upstream}' succeeded")]
    OrderingViolation { task: TaskId, upstream: TaskId },

    #[error("Executor invariant violated: {0}")]
    InvariantViolation(String),

    #[error("A run for logical date {0} is already active")]
    DuplicateRun(String),

    #[error("Run '{run_id}' failed{}", failed_task_suffix(.task))]
    RunFailed {
        run_id: String,
        task: Option<TaskId>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn failed_task_suffix(task: &Option<TaskId>) -> String {
    match task {
        Some(task) => format!(" at task '{task}'"),
        None => String::new(),
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;

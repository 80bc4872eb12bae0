// src/dag/pipeline.rs

//! Immutable pipeline definition.

use std::time::Duration;

use crate::config::model::ConfigFile;
use crate::dag::builder::PipelineBuilder;
use crate::dag::graph::DagGraph;
use crate::engine::TaskId;
use crate::errors::{PipelineError, Result};
use crate::types::parse_duration;

/// Upper bound on `max_retries`; anything larger is treated as a typo.
pub const MAX_RETRIES: u32 = 100;

/// Upper bound on a single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Bounded re-attempt configuration for one task.
///
/// A task is invoked at most `max_retries + 1` times per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Build a policy from untyped configuration values.
    pub fn from_raw(task: &str, retries: i64, delay: &str) -> Result<Self> {
        let max_retries = u32::try_from(retries).map_err(|_| PipelineError::InvalidRetryPolicy {
            task: task.to_string(),
            reason: format!("retries must be between 0 and {MAX_RETRIES} (got {retries})"),
        })?;
        let delay = parse_duration(delay).map_err(|reason| PipelineError::InvalidRetryPolicy {
            task: task.to_string(),
            reason: format!("retry_delay: {reason}"),
        })?;

        let policy = Self::new(max_retries, delay);
        policy.validate(task)?;
        Ok(policy)
    }

    pub fn validate(&self, task: &str) -> Result<()> {
        if self.max_retries > MAX_RETRIES {
            return Err(PipelineError::InvalidRetryPolicy {
                task: task.to_string(),
                reason: format!(
                    "retries must be between 0 and {MAX_RETRIES} (got {})",
                    self.max_retries
                ),
            });
        }
        if self.delay > MAX_RETRY_DELAY {
            return Err(PipelineError::InvalidRetryPolicy {
                task: task.to_string(),
                reason: format!(
                    "retry_delay must be at most {:?} (got {:?})",
                    MAX_RETRY_DELAY, self.delay
                ),
            });
        }
        Ok(())
    }

    /// Total number of invocations allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether a task that has failed `attempts_made` times may run again.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made <= self.max_retries
    }
}

/// `downstream` may not start until `upstream` has succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub upstream: TaskId,
    pub downstream: TaskId,
}

impl DependencyEdge {
    pub fn new(upstream: impl Into<TaskId>, downstream: impl Into<TaskId>) -> Self {
        Self {
            upstream: upstream.into(),
            downstream: downstream.into(),
        }
    }
}

/// One step of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub task_id: TaskId,
    /// Zero-based position in the chain.
    pub ordinal: usize,
    pub command: String,
    pub retry_policy: RetryPolicy,
}

/// The fixed set of tasks and the edges between them.
///
/// Built once (from config or with [`PipelineBuilder`]) and shared read-only
/// between runs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    id: String,
    description: Option<String>,
    /// Sorted by `ordinal`.
    tasks: Vec<TaskDefinition>,
    edges: Vec<DependencyEdge>,
    graph: DagGraph,
}

impl Pipeline {
    pub(crate) fn new_unchecked(
        id: String,
        description: Option<String>,
        tasks: Vec<TaskDefinition>,
        edges: Vec<DependencyEdge>,
        graph: DagGraph,
    ) -> Self {
        Self {
            id,
            description,
            tasks,
            edges,
            graph,
        }
    }

    /// Build the pipeline described by a validated config.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut builder = PipelineBuilder::new(&cfg.pipeline.id);
        if let Some(description) = &cfg.pipeline.description {
            builder = builder.description(description);
        }

        for (id, task) in cfg.task.iter() {
            let policy = RetryPolicy::from_raw(
                id,
                task.effective_retries(&cfg.default),
                task.effective_retry_delay(&cfg.default),
            )?;
            builder
                .task(id)
                .command(&task.cmd)
                .after(task.after.iter().cloned())
                .retry_policy(policy);
        }

        builder.build()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Task definitions in chain order.
    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.task_id == id)
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    /// Tasks that must succeed before `id` may start.
    pub fn upstream_of(&self, id: &str) -> &[TaskId] {
        self.graph.dependencies_of(id)
    }

    /// Re-check every task's retry policy.
    pub fn validate_retry_policies(&self) -> Result<()> {
        for task in &self.tasks {
            task.retry_policy.validate(&task.task_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_negative_retries() {
        let err = RetryPolicy::from_raw("extract", -1, "5m").unwrap_err();
        match err {
            PipelineError::InvalidRetryPolicy { task, reason } => {
                assert_eq!(task, "extract");
                assert!(reason.contains("-1"), "{reason}");
            }
            other => panic!("expected InvalidRetryPolicy, got {other:?}"),
        }
    }

    #[test]
    fn from_raw_rejects_bad_delays() {
        assert!(RetryPolicy::from_raw("t", 1, "five minutes").is_err());
        assert!(RetryPolicy::from_raw("t", 1, "25h").is_err());
        assert!(RetryPolicy::from_raw("t", MAX_RETRIES as i64 + 1, "1s").is_err());
    }

    #[test]
    fn retry_budget_counts_the_first_attempt_separately() {
        let policy = RetryPolicy::from_raw("t", 1, "5m").unwrap();
        assert_eq!(policy.delay, Duration::from_secs(300));
        assert_eq!(policy.max_attempts(), 2);
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));

        let no_retries = RetryPolicy::default();
        assert!(!no_retries.allows_retry(1));
    }
}

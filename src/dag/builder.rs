// src/dag/builder.rs

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::dag::graph::DagGraph;
use crate::dag::pipeline::{DependencyEdge, Pipeline, RetryPolicy, TaskDefinition};
use crate::engine::TaskId;
use crate::errors::{PipelineError, Result};

const MAX_TASK_ID_LEN: usize = 250;

static TASK_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("task id pattern is valid"));

#[derive(Debug, Clone)]
struct TaskDecl {
    task_id: TaskId,
    command: Option<String>,
    after: Vec<TaskId>,
    retry_policy: Option<RetryPolicy>,
}

impl TaskDecl {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            command: None,
            after: Vec::new(),
            retry_policy: None,
        }
    }
}

/// Declares a pipeline in code and validates it into a [`Pipeline`].
///
/// ```
/// use std::time::Duration;
/// use chainrun::dag::{PipelineBuilder, RetryPolicy};
///
/// let mut builder = PipelineBuilder::new("nightly")
///     .default_retry_policy(RetryPolicy::new(1, Duration::from_secs(300)));
/// builder.task("fetch").command("curl -sO https://example.com/data.tgz");
/// builder.task("unpack").command("tar -xzf data.tgz").after(["fetch"]);
/// let pipeline = builder.build().unwrap();
/// assert_eq!(pipeline.tasks()[1].task_id, "unpack");
/// ```
pub struct PipelineBuilder {
    id: String,
    description: Option<String>,
    default_retry_policy: RetryPolicy,
    tasks: Vec<TaskDecl>,
}

pub struct TaskBuilder<'a> {
    decl: &'a mut TaskDecl,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            description: None,
            default_retry_policy: RetryPolicy::default(),
            tasks: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Retry policy for tasks that do not set their own.
    pub fn default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }

    /// Starts defining a task with the provided task id.
    pub fn task(&mut self, task_id: &str) -> TaskBuilder<'_> {
        self.tasks.push(TaskDecl::new(task_id));
        let last = self.tasks.len() - 1;
        TaskBuilder {
            decl: &mut self.tasks[last],
        }
    }

    /// Declares `(task_id, command)` pairs as a chain, each task running after
    /// the one before it.
    pub fn chain<'s, I>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = (&'s str, &'s str)>,
    {
        let mut previous: Option<String> = None;
        for (task_id, command) in steps {
            let task = self.task(task_id).command(command);
            if let Some(upstream) = previous.take() {
                task.after([upstream]);
            }
            previous = Some(task_id.to_string());
        }
        self
    }

    /// Validates the declaration and returns the immutable pipeline.
    pub fn build(self) -> Result<Pipeline> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::ConfigError(
                "pipeline id must not be empty".to_string(),
            ));
        }
        if self.tasks.is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "pipeline '{}' must contain at least one task",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        for decl in &self.tasks {
            validate_task_id(&decl.task_id)?;
            if !ids.insert(decl.task_id.as_str()) {
                return Err(PipelineError::ConfigError(format!(
                    "duplicate task id: {}",
                    decl.task_id
                )));
            }
            let has_command = decl
                .command
                .as_ref()
                .is_some_and(|cmd| !cmd.trim().is_empty());
            if !has_command {
                return Err(PipelineError::ConfigError(format!(
                    "task '{}' has no command",
                    decl.task_id
                )));
            }
        }

        let mut edges = Vec::new();
        for decl in &self.tasks {
            for upstream in &decl.after {
                if upstream == &decl.task_id {
                    return Err(PipelineError::DagCycle(format!(
                        "task '{}' depends on itself",
                        decl.task_id
                    )));
                }
                if !ids.contains(upstream.as_str()) {
                    return Err(PipelineError::TaskNotFound(format!(
                        "'{}' (listed as upstream of '{}')",
                        upstream, decl.task_id
                    )));
                }
                edges.push(DependencyEdge::new(upstream.as_str(), decl.task_id.as_str()));
            }
        }

        let graph = DagGraph::from_edges(self.tasks.iter().map(|t| t.task_id.as_str()), &edges);
        let order = graph.topological_order()?;
        graph.ensure_chain()?;

        let ordinals: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(ordinal, id)| (id.as_str(), ordinal))
            .collect();

        let mut tasks = Vec::with_capacity(self.tasks.len());
        for decl in &self.tasks {
            let retry_policy = decl.retry_policy.unwrap_or(self.default_retry_policy);
            retry_policy.validate(&decl.task_id)?;
            tasks.push(TaskDefinition {
                task_id: decl.task_id.clone(),
                ordinal: ordinals.get(decl.task_id.as_str()).copied().unwrap_or(0),
                command: decl.command.clone().unwrap_or_default(),
                retry_policy,
            });
        }
        tasks.sort_by_key(|t| t.ordinal);

        Ok(Pipeline::new_unchecked(
            self.id,
            self.description,
            tasks,
            edges,
            graph,
        ))
    }
}

impl<'a> TaskBuilder<'a> {
    /// Sets the shell command.
    pub fn command(self, command: impl Into<String>) -> Self {
        self.decl.command = Some(command.into());
        self
    }

    /// Adds upstream tasks by id.
    pub fn after<I, S>(self, upstream: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decl.after.extend(upstream.into_iter().map(Into::into));
        self
    }

    /// Overrides the pipeline's default retry policy for this task.
    pub fn retry_policy(self, policy: RetryPolicy) -> Self {
        self.decl.retry_policy = Some(policy);
        self
    }
}

fn validate_task_id(task_id: &str) -> Result<()> {
    if task_id.is_empty() || task_id.len() > MAX_TASK_ID_LEN || !TASK_ID_RE.is_match(task_id) {
        return Err(PipelineError::ConfigError(format!(
            "invalid task id '{task_id}': use 1-{MAX_TASK_ID_LEN} letters, digits, '_', '-' or '.'"
        )));
    }
    Ok(())
}

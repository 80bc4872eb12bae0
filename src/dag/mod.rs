// src/dag/mod.rs

//! Pipeline definition.
//!
//! - [`pipeline`] holds the immutable [`Pipeline`]: task definitions, retry
//!   policies and dependency edges.
//! - [`builder`] validates a declaration (from code or config) into a
//!   `Pipeline`.
//! - [`graph`] is the adjacency view the executor uses for readiness checks.

pub mod builder;
pub mod graph;
pub mod pipeline;

pub use builder::{PipelineBuilder, TaskBuilder};
pub use graph::DagGraph;
pub use pipeline::{DependencyEdge, Pipeline, RetryPolicy, TaskDefinition};

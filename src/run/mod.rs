// src/run/mod.rs

//! Per-run records and the registry of runs by logical date.

pub mod model;
pub mod registry;

pub use model::{PipelineRun, RunKind, RunState, TaskInstance, TaskState, run_id_for};
pub use registry::RunRegistry;

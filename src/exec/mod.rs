// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running task commands, using
//! `tokio::process::Command`, and reporting back to the run's event loop via
//! `RunEvent::TaskExited`.
//!
//! - [`executor_loop`] owns the loop which manages live task processes.
//! - [`task_runner`] handles individual task process execution and the
//!   cancellation grace policy.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::spawn_executor;

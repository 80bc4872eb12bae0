// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor implementation in [`executor_loop`](super::executor_loop).
//!
//! - `RealExecutorBackend` is the default implementation. It wraps the
//!   `spawn_executor` loop and forwards launch/cancel requests over an mpsc
//!   channel.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which attempts were launched and directly emits `TaskExited` events.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::engine::{RunEvent, ScheduledTask, TaskId};
use crate::errors::{Error, Result};
use crate::types::CancelGrace;

use super::executor_loop::{ExecRequest, spawn_executor};

/// Trait abstracting how task attempts are executed.
///
/// Every launched attempt must eventually be answered with exactly one
/// `RunEvent::TaskExited` on the run's event channel.
pub trait ExecutorBackend: Send {
    /// Start the given attempt.
    ///
    /// The implementation is free to:
    /// - spawn OS processes (production)
    /// - simulate completion and emit `RunEvent`s (tests)
    fn launch(
        &mut self,
        task: ScheduledTask,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Interrupt the running attempt of `task`, if any.
    ///
    /// Backends whose attempts finish immediately can rely on the default.
    fn cancel(&mut self, task: TaskId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let _ = task;
        Box::pin(async { Ok(()) })
    }
}

impl<B: ExecutorBackend + ?Sized> ExecutorBackend for Box<B> {
    fn launch(
        &mut self,
        task: ScheduledTask,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        (**self).launch(task)
    }

    fn cancel(&mut self, task: TaskId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        (**self).cancel(task)
    }
}

/// Real executor backend used in production.
///
/// The runtime calls `launch`/`cancel`, which forward requests to the
/// background executor loop spawned in [`RealExecutorBackend::new`].
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecRequest>,
}

impl RealExecutorBackend {
    /// Create a new real executor backend reporting exits on `runtime_tx`.
    ///
    /// This spawns the background executor loop immediately; it stops when
    /// the backend is dropped.
    pub fn new(runtime_tx: mpsc::Sender<RunEvent>, cancel_grace: CancelGrace) -> Self {
        let tx = spawn_executor(runtime_tx, cancel_grace);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn launch(
        &mut self,
        task: ScheduledTask,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecRequest::Launch(task))
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }

    fn cancel(&mut self, task: TaskId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecRequest::Cancel(task))
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }
}

// src/trigger/mod.rs

//! Scheduled triggering: due-date arithmetic and the driver that calls
//! `start_run` on the configured cadence. The executor itself never backfills.

pub mod driver;
pub mod schedule;

pub use driver::{BackendFactory, ScheduleDriver};
pub use schedule::{due_logical_dates, next_fire_time};

// src/trigger/schedule.rs

//! Cadence arithmetic.
//!
//! Logical dates mark the *start* of a schedule interval; the run for
//! `[d, d + cadence)` fires once the interval is over, at `d + cadence`.

use chrono::{DateTime, Utc};

use crate::types::ScheduleCadence;

/// Logical dates that are due at `now` and newer than `last_triggered`.
///
/// With `catchup` every missed interval since `start_date` is returned, oldest
/// first; without it only the most recent due interval is.
pub fn due_logical_dates(
    cadence: ScheduleCadence,
    start_date: DateTime<Utc>,
    last_triggered: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    catchup: bool,
) -> Vec<DateTime<Utc>> {
    let Some(interval) = cadence.interval() else {
        // @once: a single run for start_date, as soon as it is reached.
        return if last_triggered.is_none() && now >= start_date {
            vec![start_date]
        } else {
            Vec::new()
        };
    };

    let completed = completed_intervals(start_date, interval, now);
    if completed == 0 {
        return Vec::new();
    }

    let first = match last_triggered {
        Some(last) if last >= start_date => completed_intervals(start_date, interval, last) + 1,
        _ => 0,
    };
    let latest = completed - 1;
    if latest < first {
        return Vec::new();
    }

    let from = if catchup { first } else { latest };
    (from..=latest)
        .map(|k| start_date + interval * k as i32)
        .collect()
}

/// When the next not-yet-due interval fires, or `None` if nothing ever will.
pub fn next_fire_time(
    cadence: ScheduleCadence,
    start_date: DateTime<Utc>,
    last_triggered: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let Some(interval) = cadence.interval() else {
        return last_triggered.is_none().then_some(start_date);
    };
    let completed = completed_intervals(start_date, interval, now);
    Some(start_date + interval * (completed as i32 + 1))
}

/// Number of whole intervals between `start_date` and `at` (0 if `at` is
/// earlier than `start_date`).
fn completed_intervals(
    start_date: DateTime<Utc>,
    interval: chrono::Duration,
    at: DateTime<Utc>,
) -> i64 {
    if at <= start_date {
        return 0;
    }
    (at - start_date).num_seconds() / interval.num_seconds()
}

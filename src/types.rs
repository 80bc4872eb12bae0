// src/types.rs

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// How often the schedule driver fires a new Pipeline Run.
///
/// The spelling follows the cron presets used by most workflow schedulers
/// (`@daily`, `@hourly`, ...). `@once` fires a single run for `start_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ScheduleCadence {
    #[serde(rename = "@once")]
    Once,
    #[serde(rename = "@hourly")]
    Hourly,
    #[serde(rename = "@daily")]
    Daily,
    #[serde(rename = "@weekly")]
    Weekly,
}

impl Default for ScheduleCadence {
    fn default() -> Self {
        ScheduleCadence::Daily
    }
}

impl ScheduleCadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleCadence::Once => "@once",
            ScheduleCadence::Hourly => "@hourly",
            ScheduleCadence::Daily => "@daily",
            ScheduleCadence::Weekly => "@weekly",
        }
    }

    /// Length of one schedule interval, or `None` for `@once`.
    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            ScheduleCadence::Once => None,
            ScheduleCadence::Hourly => Some(chrono::Duration::hours(1)),
            ScheduleCadence::Daily => Some(chrono::Duration::days(1)),
            ScheduleCadence::Weekly => Some(chrono::Duration::weeks(1)),
        }
    }
}

impl fmt::Display for ScheduleCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleCadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "@once" => Ok(ScheduleCadence::Once),
            "@hourly" => Ok(ScheduleCadence::Hourly),
            "@daily" => Ok(ScheduleCadence::Daily),
            "@weekly" => Ok(ScheduleCadence::Weekly),
            other => Err(format!(
                "invalid schedule: {other} (expected \"@once\", \"@hourly\", \"@daily\" or \"@weekly\")"
            )),
        }
    }
}

/// What happens to an already-launched command when its run is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelGrace {
    /// Let the command run to completion.
    WaitForExit,
    /// Give the command this long to exit, then kill it.
    KillAfter(Duration),
}

impl Default for CancelGrace {
    fn default() -> Self {
        CancelGrace::KillAfter(Duration::from_secs(30))
    }
}

impl FromStr for CancelGrace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wait" => Ok(CancelGrace::WaitForExit),
            other => parse_duration(other).map(CancelGrace::KillAfter),
        }
    }
}

/// Parse a simple duration string like `"30s"`, `"250ms"`, `"5m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    if num_part.is_empty() {
        return Err(format!("duration '{s}' must start with a non-negative number"));
    }
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' out of range"))
}

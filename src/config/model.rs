// src/config/model.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{CancelGrace, ScheduleCadence};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [pipeline]
/// id = "ETL_toll_data"
/// schedule = "@daily"
/// catchup = false
///
/// [default]
/// owner = "batman"
/// retries = 1
/// retry_delay = "5m"
///
/// [task.unzip_data]
/// cmd = "tar -xvzf tolldata.tgz"
///
/// [task.extract_data_from_csv]
/// cmd = "cut -d\",\" -f1-4 vehicle-data.csv > csv_data.csv"
/// after = ["unzip_data"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Pipeline identity and scheduling from `[pipeline]`.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Task defaults from `[default]`.
    #[serde(default)]
    pub default: DefaultSection,

    /// All tasks from `[task.<id>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_pipeline_id")]
    pub id: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub schedule: ScheduleCadence,

    /// `YYYY-MM-DD` or an RFC 3339 timestamp. Defaults to today, 00:00 UTC.
    #[serde(default)]
    pub start_date: Option<String>,

    /// Whether missed intervals since `start_date` are backfilled.
    #[serde(default)]
    pub catchup: bool,

    /// Upper bound on runs the schedule driver keeps in flight at once.
    #[serde(default = "default_max_active_runs")]
    pub max_active_runs: usize,

    /// `"wait"` or a duration such as `"30s"`.
    #[serde(default)]
    pub cancel_grace: Option<String>,
}

fn default_pipeline_id() -> String {
    "pipeline".to_string()
}

fn default_max_active_runs() -> usize {
    1
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            id: default_pipeline_id(),
            description: None,
            schedule: ScheduleCadence::default(),
            start_date: None,
            catchup: false,
            max_active_runs: default_max_active_runs(),
            cancel_grace: None,
        }
    }
}

/// `[default]` section: owner/contact metadata plus retry defaults applied to
/// every task that does not override them.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultSection {
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub email: Vec<String>,

    #[serde(default = "default_true")]
    pub email_on_failure: bool,

    #[serde(default)]
    pub email_on_retry: bool,

    /// Signed so that a negative value is reported as a configuration error
    /// instead of a TOML type error.
    #[serde(default)]
    pub retries: i64,

    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,
}

fn default_true() -> bool {
    true
}

fn default_retry_delay() -> String {
    "5m".to_string()
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            owner: None,
            email: Vec::new(),
            email_on_failure: true,
            email_on_retry: false,
            retries: 0,
            retry_delay: default_retry_delay(),
        }
    }
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command to execute.
    pub cmd: String,

    /// Upstream task: this task waits until it has succeeded.
    #[serde(default)]
    pub after: Vec<String>,

    /// Overrides `default.retries`.
    #[serde(default)]
    pub retries: Option<i64>,

    /// Overrides `default.retry_delay`.
    #[serde(default)]
    pub retry_delay: Option<String>,
}

impl TaskConfig {
    /// Effective retry count, falling back to `[default] retries`.
    pub fn effective_retries(&self, default: &DefaultSection) -> i64 {
        self.retries.unwrap_or(default.retries)
    }

    /// Effective retry delay string, falling back to `[default] retry_delay`.
    pub fn effective_retry_delay<'a>(&'a self, default: &'a DefaultSection) -> &'a str {
        self.retry_delay.as_deref().unwrap_or(&default.retry_delay)
    }
}

/// Validated `[pipeline]` settings with every string resolved to its type.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub id: String,
    pub description: Option<String>,
    pub schedule: ScheduleCadence,
    pub start_date: DateTime<Utc>,
    pub catchup: bool,
    pub max_active_runs: usize,
    pub cancel_grace: CancelGrace,
}

/// A configuration that passed [`validate`](crate::config::validate).
///
/// Construct it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pipeline: PipelineSettings,
    pub default: DefaultSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        pipeline: PipelineSettings,
        default: DefaultSection,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            pipeline,
            default,
            task,
        }
    }
}

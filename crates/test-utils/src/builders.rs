#![allow(dead_code)]

use std::collections::BTreeMap;

use chainrun::config::{ConfigFile, DefaultSection, PipelineSection, RawConfigFile, TaskConfig};
use chainrun::errors::Result;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(pipeline_id: &str) -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection {
                    id: pipeline_id.to_string(),
                    start_date: Some("2026-10-01".to_string()),
                    ..PipelineSection::default()
                },
                default: DefaultSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, id: &str, task: TaskConfig) -> Self {
        self.config.task.insert(id.to_string(), task);
        self
    }

    /// Add tasks as a chain, each one `after` the previous.
    pub fn with_chain(mut self, steps: &[(&str, &str)]) -> Self {
        let mut previous: Option<&str> = None;
        for (id, cmd) in steps {
            let mut task = TaskConfigBuilder::new(cmd);
            if let Some(upstream) = previous {
                task = task.after(upstream);
            }
            self.config.task.insert(id.to_string(), task.build());
            previous = Some(id);
        }
        self
    }

    pub fn with_retries(mut self, retries: i64, delay: &str) -> Self {
        self.config.default.retries = retries;
        self.config.default.retry_delay = delay.to_string();
        self
    }

    pub fn with_notifications(mut self, on_retry: bool, on_failure: bool) -> Self {
        self.config.default.email_on_retry = on_retry;
        self.config.default.email_on_failure = on_failure;
        self
    }

    pub fn with_owner(mut self, owner: &str, email: &str) -> Self {
        self.config.default.owner = Some(owner.to_string());
        self.config.default.email.push(email.to_string());
        self
    }

    pub fn with_catchup(mut self, catchup: bool) -> Self {
        self.config.pipeline.catchup = catchup;
        self
    }

    pub fn with_start_date(mut self, start_date: &str) -> Self {
        self.config.pipeline.start_date = Some(start_date.to_string());
        self
    }

    pub fn with_max_active_runs(mut self, max: usize) -> Self {
        self.config.pipeline.max_active_runs = max;
        self
    }

    pub fn with_cancel_grace(mut self, grace: &str) -> Self {
        self.config.pipeline.cancel_grace = Some(grace.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                after: vec![],
                retries: None,
                retry_delay: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn retries(mut self, retries: i64) -> Self {
        self.task.retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: &str) -> Self {
        self.task.retry_delay = Some(delay.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

// src/config/validate.rs

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::model::{ConfigFile, PipelineSettings, RawConfigFile};
use crate::dag::graph::DagGraph;
use crate::dag::pipeline::{DependencyEdge, RetryPolicy};
use crate::errors::{PipelineError, Result};
use crate::types::CancelGrace;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::PipelineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        let pipeline = resolve_pipeline_settings(&raw)?;
        Ok(ConfigFile::new_unchecked(pipeline, raw.default, raw.task))
    }
}

/// Semantic validation of a freshly deserialized config.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_pipeline_section(cfg)?;
    validate_retry_settings(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(PipelineError::ConfigError(
            "config must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.id.trim().is_empty() {
        return Err(PipelineError::ConfigError(
            "[pipeline].id must not be empty".to_string(),
        ));
    }
    if cfg.pipeline.max_active_runs == 0 {
        return Err(PipelineError::ConfigError(
            "[pipeline].max_active_runs must be >= 1 (got 0)".to_string(),
        ));
    }
    if let Some(raw) = &cfg.pipeline.start_date {
        parse_start_date(raw)?;
    }
    if let Some(raw) = &cfg.pipeline.cancel_grace {
        parse_cancel_grace(raw)?;
    }
    Ok(())
}

fn validate_retry_settings(cfg: &RawConfigFile) -> Result<()> {
    // Reject bad defaults even when every task overrides them.
    RetryPolicy::from_raw("[default]", cfg.default.retries, &cfg.default.retry_delay)?;

    for (name, task) in cfg.task.iter() {
        RetryPolicy::from_raw(
            name,
            task.effective_retries(&cfg.default),
            task.effective_retry_delay(&cfg.default),
        )?;
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if task.cmd.trim().is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "task '{}' has an empty `cmd`",
                name
            )));
        }
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(PipelineError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(PipelineError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    let edges: Vec<DependencyEdge> = cfg
        .task
        .iter()
        .flat_map(|(name, task)| {
            task.after
                .iter()
                .map(move |dep| DependencyEdge::new(dep.as_str(), name.as_str()))
        })
        .collect();

    let graph = DagGraph::from_edges(cfg.task.keys().map(String::as_str), &edges);
    graph.topological_order()?;
    graph.ensure_chain()?;
    Ok(())
}

fn resolve_pipeline_settings(cfg: &RawConfigFile) -> Result<PipelineSettings> {
    let section = &cfg.pipeline;
    let start_date = match &section.start_date {
        Some(raw) => parse_start_date(raw)?,
        None => today_midnight_utc(),
    };
    let cancel_grace = match &section.cancel_grace {
        Some(raw) => parse_cancel_grace(raw)?,
        None => CancelGrace::default(),
    };

    Ok(PipelineSettings {
        id: section.id.clone(),
        description: section.description.clone(),
        schedule: section.schedule,
        start_date,
        catchup: section.catchup,
        max_active_runs: section.max_active_runs,
        cancel_grace,
    })
}

/// Parse `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_start_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            PipelineError::ConfigError(format!(
                "invalid date '{raw}': {e} (expected YYYY-MM-DD or RFC 3339)"
            ))
        })
}

fn parse_cancel_grace(raw: &str) -> Result<CancelGrace> {
    raw.parse::<CancelGrace>().map_err(|e| {
        PipelineError::ConfigError(format!("[pipeline].cancel_grace: {e}"))
    })
}

fn today_midnight_utc() -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn start_date_accepts_plain_dates_and_timestamps() {
        assert_eq!(
            parse_start_date("2026-10-18").unwrap(),
            Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_start_date("2026-10-18T06:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2026, 10, 18, 4, 30, 0).unwrap()
        );
        assert!(matches!(
            parse_start_date("yesterday"),
            Err(PipelineError::ConfigError(_))
        ));
    }
}

// src/logging.rs

//! Logging setup for `chainrun` using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` CLI flag (a plain level for every target)
//! 2. `CHAINRUN_LOG` environment variable, read as an `EnvFilter` directive
//!    string (e.g. `debug` or `chainrun::exec=trace,info`)
//! 3. `info`
//!
//! Logs are sent to STDERR so that stdout carries only run summaries.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Environment variable consulted when `--log-level` is absent.
pub const LOG_ENV_VAR: &str = "CHAINRUN_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(lvl) = cli_level {
        return EnvFilter::new(directive_for(lvl));
    }

    match env_value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|e| {
            eprintln!("ignoring {LOG_ENV_VAR}={directives:?}: {e}");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        None => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}

fn directive_for(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    fn hint(cli: Option<LogLevel>, env: Option<&str>) -> Option<LevelFilter> {
        build_filter(cli, env).max_level_hint()
    }

    #[test]
    fn flag_beats_env() {
        assert_eq!(hint(Some(LogLevel::Warn), Some("trace")), Some(LevelFilter::WARN));
    }

    #[test]
    fn env_directives_are_honoured() {
        assert_eq!(hint(None, Some(" debug ")), Some(LevelFilter::DEBUG));
        assert_eq!(
            hint(None, Some("chainrun::exec=trace,warn")),
            Some(LevelFilter::TRACE)
        );
    }

    #[test]
    fn missing_or_blank_env_falls_back_to_info() {
        assert_eq!(hint(None, None), Some(LevelFilter::INFO));
        assert_eq!(hint(None, Some("   ")), Some(LevelFilter::INFO));
    }
}

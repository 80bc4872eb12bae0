// src/cli.rs

//! CLI argument parsing using `clap`.

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};

use crate::config::validate::parse_start_date;

/// Command-line arguments for `chainrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "chainrun",
    version,
    about = "Run a linear chain of shell tasks on a schedule, with retries.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline definition (TOML).
    ///
    /// Default: `Pipeline.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Pipeline.toml")]
    pub config: String,

    /// Trigger the runs that are due right now, wait for them, and exit.
    #[arg(long, conflicts_with = "date")]
    pub once: bool,

    /// Run the pipeline once for this logical date (`YYYY-MM-DD` or RFC 3339)
    /// and exit with an error if the run fails.
    #[arg(long, value_name = "DATE", value_parser = parse_logical_date)]
    pub date: Option<DateTime<Utc>>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CHAINRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the chain, but don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_logical_date(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_start_date(raw).map_err(|e| e.to_string())
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_flag_accepts_plain_dates() {
        let args = CliArgs::try_parse_from(["chainrun", "--date", "2026-10-18"]).unwrap();
        assert_eq!(
            args.date,
            Some(Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap())
        );
        assert_eq!(args.config, "Pipeline.toml");
    }

    #[test]
    fn once_and_date_are_exclusive() {
        assert!(CliArgs::try_parse_from(["chainrun", "--once", "--date", "2026-10-18"]).is_err());
    }
}

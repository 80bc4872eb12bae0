pub mod builders;
pub mod fake_executor;
pub mod notifier;

use std::sync::{Arc, Once};

use chainrun::config::ConfigFile;
use chainrun::dag::Pipeline;
use chainrun::engine::{ExecutorOptions, PipelineExecutor};
use chainrun::logging::LOG_ENV_VAR;
use chrono::{DateTime, TimeZone, Utc};
use tracing_subscriber::{fmt, EnvFilter};

pub use notifier::RecordingNotifier;

static INIT: Once = Once::new();

/// Route engine logs into the test harness writer, so they only show up for
/// failing tests (or with `--nocapture`).
///
/// Reads the same `CHAINRUN_LOG` directives as the binary and defaults to
/// `warn` to keep passing runs quiet.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .try_init();
    });
}

/// Executor for `cfg` that delivers notifications to `notifier`.
pub fn executor_for(cfg: &ConfigFile, notifier: &RecordingNotifier) -> PipelineExecutor {
    let pipeline = Pipeline::from_config(cfg).expect("pipeline from valid config");
    PipelineExecutor::new(
        Arc::new(pipeline),
        ExecutorOptions::from_config(cfg),
        Arc::new(notifier.clone()),
    )
}

/// Midnight UTC on the given day.
pub fn day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("valid calendar date")
}

/// Fail the test if `f` takes longer than 5 seconds. Not for paused-time
/// tests: the clock auto-advances straight to the deadline.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("test timed out after 5 seconds")
}

//! Tracing subscriber setup.

use crate::error::{MonitorError, Result};
use std::sync::Once;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Environment variable holding a filter directive; overrides `level`.
pub const LOG_ENV: &str = "MEMSWEEP_LOG";

/// Installs a stderr fmt subscriber at `level` (`error` .. `trace`).
///
/// # Errors
///
/// Returns [`MonitorError::ConfigInvalid`] for an unknown level or if a
/// global subscriber is already installed.
pub fn init(level: &str) -> Result<()> {
    let level = level.parse::<LevelFilter>().map_err(|e| MonitorError::ConfigInvalid {
        key: "log_level",
        message: e.to_string(),
    })?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| MonitorError::ConfigInvalid { key: "log_level", message: e.to_string() })?;

    info!(%level, "logging initialized");
    Ok(())
}

/// Routes logs into the test harness's captured output. Safe to call from
/// every test.
#[doc(hidden)]
pub fn init_for_tests() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("memsweep=debug"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_level() {
        assert!(matches!(init("loud"), Err(MonitorError::ConfigInvalid { key: "log_level", .. })));
    }

    #[test]
    fn test_init_for_tests_is_idempotent() {
        init_for_tests();
        init_for_tests();
        tracing::debug!("still fine");
    }
}

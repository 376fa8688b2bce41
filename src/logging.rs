// src/logging.rs

//! Logging setup for the `tailor` binary using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `TAILOR_LOG` environment variable, as an `EnvFilter` directive
//!    (e.g. "debug" or "tailor::engine=trace,info")
//! 3. default to [`DEFAULT_DIRECTIVE`] (`warn`), so that tailed lines are not
//!    drowned in chatter
//!
//! Logs go to STDERR; stdout carries tailed lines only. The library never
//! installs a subscriber on its own.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV_VAR: &str = "TAILOR_LOG";

/// Filter used when neither the flag nor the environment gives one.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = resolve_filter(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("installing tracing subscriber: {err}"))?;

    Ok(())
}

fn resolve_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level_directive(level));
    }
    env.and_then(|directive| EnvFilter::try_new(directive.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn level_directive(lvl: LogLevel) -> &'static str {
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
    use super::*;

    #[test]
    fn cli_flag_wins_over_environment() {
        let filter = resolve_filter(Some(LogLevel::Debug), Some("error"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn environment_directive_is_used_when_valid() {
        let filter = resolve_filter(None, Some("tailor=trace"));
        assert_eq!(filter.to_string(), "tailor=trace");
    }

    #[test]
    fn garbage_environment_falls_back_to_warn() {
        let filter = resolve_filter(None, Some("tailor=loudest"));
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn nothing_configured_means_warn() {
        assert_eq!(resolve_filter(None, None).to_string(), DEFAULT_DIRECTIVE);
    }
}

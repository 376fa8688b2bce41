// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, TailorError};
use crate::tail::filter::build_globset;

/// Smallest accepted polling interval.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TailorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.engine, raw.directory))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine(cfg)?;
    validate_ignore_patterns(cfg)?;
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    let engine = &cfg.engine;

    if engine.poll_interval_ms < MIN_POLL_INTERVAL_MS {
        return Err(TailorError::ConfigError(format!(
            "[engine].poll_interval_ms must be >= {} (got {})",
            MIN_POLL_INTERVAL_MS, engine.poll_interval_ms
        )));
    }

    if engine.resync_interval_ms != 0 && engine.resync_interval_ms < MIN_POLL_INTERVAL_MS {
        return Err(TailorError::ConfigError(format!(
            "[engine].resync_interval_ms must be 0 or >= {} (got {})",
            MIN_POLL_INTERVAL_MS, engine.resync_interval_ms
        )));
    }

    for (key, value) in [
        ("dispatch_queue_capacity", engine.dispatch_queue_capacity as u64),
        ("worker_threads", engine.worker_threads as u64),
        ("read_chunk_bytes", engine.read_chunk_bytes),
    ] {
        if value == 0 {
            return Err(TailorError::ConfigError(format!(
                "[engine].{key} must be >= 1 (got 0)"
            )));
        }
    }

    Ok(())
}

fn validate_ignore_patterns(cfg: &RawConfigFile) -> Result<()> {
    build_globset(&cfg.directory.ignore).map_err(|err| {
        TailorError::ConfigError(format!("[directory].ignore is invalid: {err:#}"))
    })?;
    Ok(())
}

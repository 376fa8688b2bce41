// src/config/mod.rs

//! Configuration loading and validation for tailor.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate value ranges and ignore globs (`validate.rs`).
//!
//! [`EngineConfig`] is the runtime view handed to the engine; it can be built
//! from a validated [`ConfigFile`] or constructed directly by library users.

pub mod loader;
pub mod model;
pub mod validate;

use std::time::Duration;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{ConfigFile, DirectorySection, EngineSection, RawConfigFile};

use crate::types::ObserverBackend;

/// Settings the engine runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Which `notify` backend observes paths.
    pub observer: ObserverBackend,
    /// Scan interval of the polling backend.
    pub poll_interval: Duration,
    /// Bound of the queue between tailing units and the dispatcher.
    pub dispatch_queue_capacity: usize,
    /// Tokio worker threads running the units.
    pub worker_threads: usize,
    /// How long `destroy` waits for blocking reads to finish.
    pub shutdown_timeout: Duration,
    /// Upper bound of a single read from a tailed file.
    pub read_chunk_bytes: u64,
    /// File-name globs of directory children that are never tailed.
    pub directory_ignore: Vec<String>,
    /// Re-check a watched path after this long without an event; covers
    /// events the OS watcher dropped. `None` disables it.
    pub resync_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::from(&ConfigFile::default())
    }
}

impl From<&ConfigFile> for EngineConfig {
    fn from(cfg: &ConfigFile) -> Self {
        let engine = cfg.engine();
        Self {
            observer: engine.observer,
            poll_interval: Duration::from_millis(engine.poll_interval_ms),
            dispatch_queue_capacity: engine.dispatch_queue_capacity,
            worker_threads: engine.worker_threads,
            shutdown_timeout: Duration::from_millis(engine.shutdown_timeout_ms),
            read_chunk_bytes: engine.read_chunk_bytes,
            directory_ignore: cfg.directory().ignore.clone(),
            resync_interval: match engine.resync_interval_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}

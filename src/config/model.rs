// src/config/model.rs

use serde::Deserialize;

use crate::types::ObserverBackend;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// observer = "poll"
/// poll_interval_ms = 250
///
/// [directory]
/// ignore = [".*", "*.gz"]
/// ```
///
/// Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub directory: DirectorySection,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (or `Default`, which is
/// valid by construction).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    engine: EngineSection,
    directory: DirectorySection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(engine: EngineSection, directory: DirectorySection) -> Self {
        Self { engine, directory }
    }

    pub fn engine(&self) -> &EngineSection {
        &self.engine
    }

    pub fn directory(&self) -> &DirectorySection {
        &self.directory
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        let raw = RawConfigFile::default();
        Self::new_unchecked(raw.engine, raw.directory)
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// `"native"` (default) or `"poll"`.
    #[serde(default)]
    pub observer: ObserverBackend,

    /// Scan interval of the polling observer, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: u64,

    /// Quiet period after which a watch re-checks its path even without an
    /// event, in milliseconds. `0` turns this off.
    #[serde(default = "default_resync_interval_ms")]
    pub resync_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_dispatch_queue_capacity() -> usize {
    1024
}

fn default_worker_threads() -> usize {
    2
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_read_chunk_bytes() -> u64 {
    1024 * 1024
}

fn default_resync_interval_ms() -> u64 {
    2000
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            observer: ObserverBackend::default(),
            poll_interval_ms: default_poll_interval_ms(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            worker_threads: default_worker_threads(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            read_chunk_bytes: default_read_chunk_bytes(),
            resync_interval_ms: default_resync_interval_ms(),
        }
    }
}

/// `[directory]` section: how directory watches pick their children.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySection {
    /// Globs matched against child file names; matches are not tailed.
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

fn default_ignore() -> Vec<String> {
    vec![".*".to_string()]
}

impl Default for DirectorySection {
    fn default() -> Self {
        Self {
            ignore: default_ignore(),
        }
    }
}

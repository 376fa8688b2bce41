#![allow(dead_code)]

use std::time::Duration;

use tailor::config::{ConfigFile, EngineConfig, RawConfigFile};
use tailor::types::ObserverBackend;

/// Builder for `EngineConfig` to simplify test setup.
///
/// Starts from the validated defaults, with a short shutdown timeout so
/// tests tear down quickly, and without idle resync so that only the events
/// a test emits drive the engine.
pub struct ConfigBuilder {
    raw: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut raw = RawConfigFile::default();
        raw.engine.shutdown_timeout_ms = 500;
        raw.engine.resync_interval_ms = 0;
        Self { raw }
    }

    /// Polling observer with a fast scan interval.
    pub fn poll(mut self, interval_ms: u64) -> Self {
        self.raw.engine.observer = ObserverBackend::Poll;
        self.raw.engine.poll_interval_ms = interval_ms;
        self
    }

    pub fn native(mut self) -> Self {
        self.raw.engine.observer = ObserverBackend::Native;
        self
    }

    /// Re-check watched paths after `interval_ms` without events.
    pub fn resync(mut self, interval_ms: u64) -> Self {
        self.raw.engine.resync_interval_ms = interval_ms;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.raw.engine.dispatch_queue_capacity = capacity;
        self
    }

    pub fn read_chunk_bytes(mut self, bytes: u64) -> Self {
        self.raw.engine.read_chunk_bytes = bytes;
        self
    }

    pub fn ignore(mut self, patterns: &[&str]) -> Self {
        self.raw.directory.ignore = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn build_file(self) -> ConfigFile {
        ConfigFile::try_from(self.raw).expect("Failed to build valid config from builder")
    }

    pub fn build(self) -> EngineConfig {
        let cfg = self.build_file();
        let mut engine = EngineConfig::from(&cfg);
        engine.shutdown_timeout = engine.shutdown_timeout.min(Duration::from_secs(1));
        engine
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

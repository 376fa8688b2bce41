// src/types.rs

//! Shared vocabulary of the engine: client ids, message types, events.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

/// Identifier of one active watch.
///
/// Ids are handed out monotonically starting at 0 and are never reused by the
/// engine instance that issued them.
pub type ClientId = i32;

/// Reserved id meaning "no such watch" / registration failure.
pub const INVALID_CLIENT_ID: ClientId = -1;

/// Wire value of [`MessageType::NewFileStarted`].
pub const NEW_FILE_STARTED: u32 = 0;

/// Wire value of [`MessageType::NewLinesAdded`].
pub const NEW_LINES_ADDED: u32 = 1;

/// Tag passed to the new-lines callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// A file started being tailed (initial watch, directory child or rotation).
    NewFileStarted = NEW_FILE_STARTED,
    /// Complete lines were appended to a tailed file.
    NewLinesAdded = NEW_LINES_ADDED,
}

impl MessageType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MessageType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            NEW_FILE_STARTED => Ok(MessageType::NewFileStarted),
            NEW_LINES_ADDED => Ok(MessageType::NewLinesAdded),
            other => Err(other),
        }
    }
}

/// Event produced by a tailing unit, before it is tagged with a client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `path` started being tailed.
    ///
    /// `lines` is the backfill: the complete lines that already existed when
    /// the watch was established. It is empty for files that appeared later
    /// and for rotations; their content follows as `NewLinesAdded`.
    NewFileStarted { path: PathBuf, lines: Vec<String> },
    /// Ordered batch of complete lines appended since the previous delivery.
    NewLinesAdded { path: PathBuf, lines: Vec<String> },
}

impl Event {
    pub fn message_type(&self) -> MessageType {
        match self {
            Event::NewFileStarted { .. } => MessageType::NewFileStarted,
            Event::NewLinesAdded { .. } => MessageType::NewLinesAdded,
        }
    }

    pub fn lines(&self) -> &[String] {
        match self {
            Event::NewFileStarted { lines, .. } | Event::NewLinesAdded { lines, .. } => lines,
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            Event::NewFileStarted { path, .. } | Event::NewLinesAdded { path, .. } => path,
        }
    }
}

/// An event on its way to the dispatcher.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub client_id: ClientId,
    pub event: Event,
}

/// What a watch target turned out to be at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    File,
    Directory,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::File => f.write_str("file"),
            TargetKind::Directory => f.write_str("directory"),
        }
    }
}

/// Which `notify` backend feeds the path observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverBackend {
    /// inotify / FSEvents / ReadDirectoryChangesW via `RecommendedWatcher`.
    Native,
    /// `notify::PollWatcher` scanning at `poll_interval_ms`.
    Poll,
}

impl Default for ObserverBackend {
    fn default() -> Self {
        ObserverBackend::Native
    }
}

impl FromStr for ObserverBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "native" => Ok(ObserverBackend::Native),
            "poll" => Ok(ObserverBackend::Poll),
            other => Err(format!(
                "invalid observer backend: {other} (expected \"native\" or \"poll\")"
            )),
        }
    }
}

// src/observe/mod.rs

//! Path observers: the source of "something changed at this path" events.
//!
//! A [`PathObserver`] turns one watched path into a [`Subscription`], an
//! unbounded, ordered stream of [`PathChange`]s. Events are delivered at
//! least once; consumers re-check the filesystem on every event, so
//! duplicates are harmless.
//!
//! - [`notify_observer`] is the production implementation on top of the
//!   `notify` crate (native OS watcher or polling).
//! - [`manual`] is a scripted observer for deterministic tests.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::types::TargetKind;

pub mod manual;
pub mod notify_observer;

pub use manual::ManualObserver;
pub use notify_observer::NotifyObserver;

/// Low-level change reported for a watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathChange {
    /// The file grew; `len` is its size when the change was observed.
    Grew { len: u64 },
    /// A directory target gained (or touched) the child `path`.
    Created { path: PathBuf },
    /// Same path, different file: rename-and-recreate or truncation.
    Replaced,
    /// Nothing exists at the path any more.
    Removed,
    /// Events may have been dropped; the consumer should resynchronise.
    Rescan,
    /// The underlying watch primitive failed and will not recover.
    Failed { reason: String },
}

/// A live subscription to one path.
///
/// Dropping it releases the underlying OS resource.
pub struct Subscription {
    path: PathBuf,
    rx: mpsc::UnboundedReceiver<PathChange>,
    idle_resync: Option<Duration>,
    _guard: Box<dyn Any + Send>,
}

impl Subscription {
    /// Wrap a change stream. `guard` is kept alive for as long as the
    /// subscription (typically the `notify` watcher feeding `rx`).
    pub fn new(
        path: impl Into<PathBuf>,
        rx: mpsc::UnboundedReceiver<PathChange>,
        guard: impl Any + Send,
    ) -> Self {
        Self {
            path: path.into(),
            rx,
            idle_resync: None,
            _guard: Box::new(guard),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Report [`PathChange::Rescan`] whenever `idle` passes without a
    /// change, so a change the observer never reported is still picked up.
    pub fn with_idle_resync(mut self, idle: Option<Duration>) -> Self {
        self.idle_resync = idle;
        self
    }

    /// Wait for the next change. `None` means the observer went away.
    ///
    /// Cancel-safe: dropping the future loses no change.
    pub async fn next(&mut self) -> Option<PathChange> {
        let Some(idle) = self.idle_resync else {
            return self.rx.recv().await;
        };
        match tokio::time::timeout(idle, self.rx.recv()).await {
            Ok(change) => change,
            Err(_) => Some(PathChange::Rescan),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("idle_resync", &self.idle_resync)
            .finish_non_exhaustive()
    }
}

/// Capability to observe paths.
pub trait PathObserver: Send + Sync + fmt::Debug {
    /// Start observing `path`, which is known to be a `kind`.
    ///
    /// Failure to set up the watch surfaces here, synchronously.
    fn subscribe(&self, path: &Path, kind: TargetKind) -> Result<Subscription>;
}

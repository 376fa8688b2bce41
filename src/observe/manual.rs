// src/observe/manual.rs

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use tokio::sync::mpsc;

use crate::observe::{PathChange, PathObserver, Subscription};
use crate::types::TargetKind;

#[derive(Debug, Default)]
struct ManualState {
    subscribers: HashMap<PathBuf, Vec<mpsc::UnboundedSender<PathChange>>>,
    refused: HashSet<PathBuf>,
}

/// Observer whose events are injected by hand.
///
/// Pair it with [`crate::fs::mock::MockFileSystem`]: mutate the mock, then
/// [`emit`](ManualObserver::emit) the matching change.
#[derive(Debug, Clone, Default)]
pub struct ManualObserver {
    state: Arc<Mutex<ManualState>>,
}

impl ManualObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `change` to every live subscription of `path`.
    ///
    /// Returns how many subscriptions received it.
    pub fn emit(&self, path: impl AsRef<Path>, change: PathChange) -> usize {
        let mut state = self.lock();
        let Some(senders) = state.subscribers.get_mut(path.as_ref()) else {
            return 0;
        };
        senders.retain(|tx| tx.send(change.clone()).is_ok());
        senders.len()
    }

    /// Make future `subscribe` calls for `path` fail.
    pub fn refuse(&self, path: impl AsRef<Path>) {
        self.lock().refused.insert(path.as_ref().to_path_buf());
    }

    /// Number of subscriptions to `path` that have not been dropped.
    pub fn subscriber_count(&self, path: impl AsRef<Path>) -> usize {
        let mut state = self.lock();
        match state.subscribers.get_mut(path.as_ref()) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    /// End every stream for `path`, as if the OS watch vanished.
    pub fn close(&self, path: impl AsRef<Path>) {
        self.lock().subscribers.remove(path.as_ref());
    }
}

impl PathObserver for ManualObserver {
    fn subscribe(&self, path: &Path, _kind: TargetKind) -> Result<Subscription> {
        let mut state = self.lock();
        if state.refused.contains(path) {
            bail!("manual observer refuses {:?}", path);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state
            .subscribers
            .entry(path.to_path_buf())
            .or_default()
            .push(tx);
        Ok(Subscription::new(path, rx, ()))
    }
}

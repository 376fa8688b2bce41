// src/tail/directory.rs

//! Directory watch: one child file tail per regular file in the directory.
//!
//! The directory unit itself never reads file content. It lists children,
//! filters them, and asks its spawner to attach a [`FileTail`](super::FileTail)
//! for each candidate. The spawner owns deduplication, so duplicate
//! `Created` reports for an already tailed child are harmless.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::fs::{EntryKind, FileSystem};
use crate::observe::{PathChange, Subscription};
use crate::tail::{ChildFilter, StartMode, UnitExit};
use crate::types::ClientId;

#[derive(Debug)]
pub struct DirectoryTail {
    client_id: ClientId,
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    filter: ChildFilter,
}

impl DirectoryTail {
    pub fn new(
        client_id: ClientId,
        dir: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        filter: ChildFilter,
    ) -> Self {
        Self {
            client_id,
            dir: dir.into(),
            fs,
            filter,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Regular, non-ignored files currently in the directory, sorted.
    pub fn list_children(&self) -> Vec<PathBuf> {
        let entries = match self.fs.read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(client_id = self.client_id, dir = ?self.dir, error = %err, "listing directory failed");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter(|path| self.filter.allows(path))
            .filter(|path| self.is_regular_file(path))
            .collect()
    }

    /// Children an observer change points at. May contain paths that are
    /// already tailed.
    pub fn candidates(&self, change: &PathChange) -> Vec<PathBuf> {
        match change {
            PathChange::Created { path } => {
                if path.parent() == Some(self.dir.as_path()) && self.filter.allows(path) {
                    vec![path.clone()]
                } else {
                    Vec::new()
                }
            }
            PathChange::Rescan => self.list_children(),
            PathChange::Replaced => {
                info!(client_id = self.client_id, dir = ?self.dir, "watched directory recreated");
                self.list_children()
            }
            PathChange::Removed => {
                debug!(client_id = self.client_id, dir = ?self.dir, "watched directory removed; waiting for it to return");
                Vec::new()
            }
            PathChange::Grew { .. } | PathChange::Failed { .. } => Vec::new(),
        }
    }

    fn is_regular_file(&self, path: &Path) -> bool {
        matches!(
            self.fs.metadata(path),
            Ok(Some(meta)) if meta.kind == EntryKind::File
        )
    }
}

/// Drive a [`DirectoryTail`]. `attach` is asked to start a child file tail and
/// reports whether a new one was started.
///
/// The subscription is taken before the initial listing, so a file created
/// in between is reported by both and deduplicated by `attach`.
pub async fn run_directory_tail<F>(
    dir: DirectoryTail,
    mut subscription: Subscription,
    mut cancel: oneshot::Receiver<()>,
    attach: F,
) -> UnitExit
where
    F: Fn(&Path, StartMode) -> Result<bool> + Send + Sync + 'static,
{
    let dir = Arc::new(dir);
    let attach = Arc::new(attach);

    let initial = {
        let dir = Arc::clone(&dir);
        let attach = Arc::clone(&attach);
        tokio::task::spawn_blocking(move || attach_all(&dir, dir.list_children(), StartMode::Backfill, &*attach))
            .await
    };
    match initial {
        Ok(count) => info!(client_id = dir.client_id, dir = ?dir.dir, children = count, "directory watch established"),
        Err(err) => return UnitExit::ObserverFailed(format!("initial listing failed: {err}")),
    }

    let exit = loop {
        tokio::select! {
            biased;

            _ = &mut cancel => break UnitExit::Cancelled,

            change = subscription.next() => {
                let change = match change {
                    None => break UnitExit::ObserverClosed,
                    Some(PathChange::Failed { reason }) => break UnitExit::ObserverFailed(reason),
                    Some(change) => change,
                };

                let dir = Arc::clone(&dir);
                let attach = Arc::clone(&attach);
                let handled = tokio::task::spawn_blocking(move || {
                    let candidates = dir.candidates(&change);
                    attach_all(&dir, candidates, StartMode::Fresh, &*attach)
                })
                .await;
                if let Err(err) = handled {
                    break UnitExit::ObserverFailed(format!("change task failed: {err}"));
                }
            }
        }
    };

    debug!(client_id = dir.client_id, dir = ?dir.dir, ?exit, "directory tail finished");
    exit
}

fn attach_all<F>(dir: &DirectoryTail, children: Vec<PathBuf>, mode: StartMode, attach: &F) -> usize
where
    F: Fn(&Path, StartMode) -> Result<bool>,
{
    let mut started = 0;
    for child in children {
        match attach(&child, mode) {
            Ok(true) => {
                debug!(client_id = dir.client_id, child = ?child, ?mode, "tailing directory child");
                started += 1;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(client_id = dir.client_id, child = ?child, error = %err, "could not tail directory child");
            }
        }
    }
    started
}

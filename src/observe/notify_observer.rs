// src/observe/notify_observer.rs

//! [`PathObserver`] backed by the `notify` crate.
//!
//! OS watches are opened per *directory* and shared: every subscription
//! registers a route on the [`WatchHub`] of the directory it needs, and the
//! hub fans each raw event out to its routes. A directory client with a
//! thousand children therefore holds two OS watches (the directory and its
//! parent), not a thousand.
//!
//! - File targets route through their parent directory (non-recursive), so
//!   rename-and-recreate rotations are seen. Raw events for the target are
//!   classified into [`PathChange`]s by comparing the file's identity and
//!   length with the previous observation.
//! - Directory targets route child events through their own hub, and their
//!   own presence through the parent's hub. When the directory comes back
//!   after removal, its hub is re-armed and the subscriber gets `Replaced`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{
    Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::fs::{EntryKind, FileId, FileSystem};
use crate::observe::{PathChange, PathObserver, Subscription};
use crate::types::{ObserverBackend, TargetKind};

type Route = Box<dyn FnMut(&notify::Result<Event>) + Send>;
type Routes = Arc<Mutex<BTreeMap<u64, Route>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Production path observer.
#[derive(Debug, Clone)]
pub struct NotifyObserver {
    backend: ObserverBackend,
    poll_interval: Duration,
    fs: Arc<dyn FileSystem>,
    hubs: Arc<Mutex<HashMap<PathBuf, Weak<WatchHub>>>>,
    next_route: Arc<AtomicU64>,
}

impl NotifyObserver {
    pub fn new(backend: ObserverBackend, poll_interval: Duration, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            backend,
            poll_interval,
            fs,
            hubs: Arc::new(Mutex::new(HashMap::new())),
            next_route: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of directories with a live OS watch.
    pub fn watched_dirs(&self) -> usize {
        lock(&self.hubs)
            .values()
            .filter(|hub| hub.strong_count() > 0)
            .count()
    }

    /// The shared hub for `dir`, opening its OS watch on first use.
    fn hub(&self, dir: &Path) -> Result<Arc<WatchHub>> {
        let mut hubs = lock(&self.hubs);
        if let Some(hub) = hubs.get(dir).and_then(Weak::upgrade) {
            return Ok(hub);
        }
        hubs.retain(|_, hub| hub.strong_count() > 0);

        let routes: Routes = Arc::new(Mutex::new(BTreeMap::new()));
        let fan_out = Arc::downgrade(&routes);
        let watched = dir.to_path_buf();
        let handler = move |res: notify::Result<Event>| {
            if let Err(err) = &res {
                if is_vanished_root(err) {
                    // Polling a directory that was removed; its parent's
                    // watch reports the removal and the return.
                    trace!(dir = ?watched, error = %err, "watched directory is gone");
                    return;
                }
            }
            let Some(routes) = fan_out.upgrade() else {
                return;
            };
            for route in lock(&routes).values_mut() {
                route(&res);
            }
        };

        let config = Config::default().with_poll_interval(self.poll_interval);
        let mut watcher: Box<dyn Watcher + Send> = match self.backend {
            ObserverBackend::Native => Box::new(RecommendedWatcher::new(handler, config)?),
            ObserverBackend::Poll => Box::new(PollWatcher::new(handler, config)?),
        };
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {:?}", dir))?;

        debug!(dir = ?dir, backend = ?self.backend, "opened directory watch");
        let hub = Arc::new(WatchHub {
            dir: dir.to_path_buf(),
            routes,
            watcher: Mutex::new(watcher),
        });
        hubs.insert(dir.to_path_buf(), Arc::downgrade(&hub));
        Ok(hub)
    }

    fn route(&self, hub: &Arc<WatchHub>, route: Route) -> RouteGuard {
        let id = self.next_route.fetch_add(1, Ordering::Relaxed);
        lock(&hub.routes).insert(id, route);
        RouteGuard {
            hub: Arc::clone(hub),
            id,
        }
    }

    fn subscribe_file(&self, path: &Path) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut classifier = FileClassifier::new(path.to_path_buf(), Arc::clone(&self.fs));
        let target = path.to_path_buf();

        let hub = self.hub(parent_or_self(path))?;
        let guard = self.route(
            &hub,
            Box::new(move |res: &notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_target = event.paths.iter().any(|p| p == &target);
                    if !touches_target && !event.need_rescan() {
                        return;
                    }
                    trace!(?event, "notify event for watched file");
                    if let Some(change) = classifier.classify() {
                        // Receiver gone means the subscription is being torn down.
                        let _ = tx.send(change);
                    }
                }
                Err(err) => {
                    let _ = tx.send(PathChange::Failed {
                        reason: err.to_string(),
                    });
                }
            }),
        );

        info!(path = ?path, backend = ?self.backend, "observing file");
        Ok(Subscription::new(path, rx, vec![guard]))
    }

    fn subscribe_dir(&self, path: &Path) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guards = Vec::with_capacity(2);

        let hub = self.hub(path)?;
        let dir = path.to_path_buf();
        let children_tx = tx.clone();
        guards.push(self.route(
            &hub,
            Box::new(move |res: &notify::Result<Event>| match res {
                Ok(event) => {
                    trace!(?event, "notify event for watched directory");
                    for change in classify_dir_event(&dir, event) {
                        let _ = children_tx.send(change);
                    }
                }
                Err(err) => {
                    let _ = children_tx.send(PathChange::Failed {
                        reason: err.to_string(),
                    });
                }
            }),
        ));

        // The directory's own removal and return are seen from its parent.
        let parent = parent_or_self(path);
        if parent != path {
            let parent_hub = self.hub(parent)?;
            let mut presence = DirPresence::new(path.to_path_buf(), Arc::clone(&self.fs), Arc::downgrade(&hub));
            let target = path.to_path_buf();
            guards.push(self.route(
                &parent_hub,
                Box::new(move |res: &notify::Result<Event>| {
                    let Ok(event) = res else {
                        // Errors of the parent watch do not concern the children.
                        return;
                    };
                    if !event.need_rescan() && !event.paths.iter().any(|p| p == &target) {
                        return;
                    }
                    if let Some(change) = presence.classify() {
                        let _ = tx.send(change);
                    }
                }),
            ));
        }

        info!(path = ?path, backend = ?self.backend, "observing directory");
        Ok(Subscription::new(path, rx, guards))
    }
}

impl PathObserver for NotifyObserver {
    fn subscribe(&self, path: &Path, kind: TargetKind) -> Result<Subscription> {
        match kind {
            TargetKind::File => self.subscribe_file(path),
            TargetKind::Directory => self.subscribe_dir(path),
        }
    }
}

fn is_vanished_root(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

fn parent_or_self(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => path,
    }
}

/// One OS watch on a directory, shared by every route that needs it.
struct WatchHub {
    dir: PathBuf,
    routes: Routes,
    watcher: Mutex<Box<dyn Watcher + Send>>,
}

impl WatchHub {
    /// Point the OS watch at whatever directory now lives at `dir`.
    fn rearm(&self) -> notify::Result<()> {
        let mut watcher = lock(&self.watcher);
        // The old watch usually died with the old directory.
        let _ = watcher.unwatch(&self.dir);
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)
    }
}

impl fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHub")
            .field("dir", &self.dir)
            .field("routes", &lock(&self.routes).len())
            .finish_non_exhaustive()
    }
}

/// Keeps a route registered for as long as its subscription lives.
struct RouteGuard {
    hub: Arc<WatchHub>,
    id: u64,
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        lock(&self.hub.routes).remove(&self.id);
    }
}

/// Turns "something happened near this file" into a [`PathChange`].
///
/// Keeps the last observed identity and length; only transitions are
/// reported.
struct FileClassifier {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    last: Option<(FileId, u64)>,
}

impl FileClassifier {
    fn new(path: PathBuf, fs: Arc<dyn FileSystem>) -> Self {
        let last = match fs.metadata(&path) {
            Ok(Some(meta)) if meta.kind == EntryKind::File => Some((meta.id, meta.len)),
            _ => None,
        };
        Self { path, fs, last }
    }

    fn classify(&mut self) -> Option<PathChange> {
        let current = match self.fs.metadata(&self.path) {
            Ok(Some(meta)) if meta.kind == EntryKind::File => Some((meta.id, meta.len)),
            Ok(_) => None,
            Err(err) => {
                debug!(path = ?self.path, error = %err, "stat failed while classifying event");
                return None;
            }
        };

        let change = classify_transition(self.last, current);
        self.last = current;
        change
    }
}

fn classify_transition(
    previous: Option<(FileId, u64)>,
    current: Option<(FileId, u64)>,
) -> Option<PathChange> {
    match (previous, current) {
        (Some(_), None) => Some(PathChange::Removed),
        (None, None) => None,
        (None, Some(_)) => Some(PathChange::Replaced),
        (Some((old_id, old_len)), Some((id, len))) => {
            if id != old_id || len < old_len {
                Some(PathChange::Replaced)
            } else if len > old_len {
                Some(PathChange::Grew { len })
            } else {
                None
            }
        }
    }
}

/// Tracks whether a watched directory still exists, re-arming its hub when
/// a new directory appears under the same name.
struct DirPresence {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    hub: Weak<WatchHub>,
    last: Option<FileId>,
}

impl DirPresence {
    fn new(dir: PathBuf, fs: Arc<dyn FileSystem>, hub: Weak<WatchHub>) -> Self {
        let last = stat_dir(fs.as_ref(), &dir);
        Self { dir, fs, hub, last }
    }

    fn classify(&mut self) -> Option<PathChange> {
        let current = stat_dir(self.fs.as_ref(), &self.dir);
        let change = classify_presence(self.last, current);
        self.last = current;

        if change == Some(PathChange::Replaced) {
            if let Some(hub) = self.hub.upgrade() {
                if let Err(err) = hub.rearm() {
                    warn!(dir = ?self.dir, error = %err, "could not re-arm directory watch");
                    return Some(PathChange::Failed {
                        reason: format!("re-arming {:?}: {err}", self.dir),
                    });
                }
                info!(dir = ?self.dir, "watched directory reappeared");
            }
        }
        change
    }
}

fn stat_dir(fs: &dyn FileSystem, dir: &Path) -> Option<FileId> {
    match fs.metadata(dir) {
        Ok(Some(meta)) if meta.kind == EntryKind::Dir => Some(meta.id),
        _ => None,
    }
}

fn classify_presence(previous: Option<FileId>, current: Option<FileId>) -> Option<PathChange> {
    match (previous, current) {
        (Some(_), None) => Some(PathChange::Removed),
        (None, Some(_)) => Some(PathChange::Replaced),
        (Some(old), Some(new)) if old != new => Some(PathChange::Replaced),
        _ => None,
    }
}

fn classify_dir_event(dir: &Path, event: &Event) -> Vec<PathChange> {
    if event.need_rescan() {
        warn!(dir = ?dir, "observer requested rescan; events may have been dropped");
        return vec![PathChange::Rescan];
    }

    let mut changes = Vec::new();
    for path in &event.paths {
        // The directory's own removal is reported through its parent.
        if path.parent() != Some(dir) {
            continue;
        }

        let child_appeared = match event.kind {
            EventKind::Create(_) => true,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
            EventKind::Modify(_) => true,
            _ => false,
        };
        if child_appeared {
            changes.push(PathChange::Created { path: path.clone() });
        }
    }
    changes
}

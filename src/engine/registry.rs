// src/engine/registry.rs

//! Registration table: client ids, their watch records and running units.
//!
//! Every unit (a root file/directory tail or a directory child tail) is keyed
//! by `(client_id, path)`, so all units of one client form a contiguous range
//! and can be cancelled together. The table is the single source of truth
//! for "is this client still active", which the dispatcher consults before
//! every delivery.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use anyhow::anyhow;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{Result, TailorError};
use crate::fs::{EntryKind, FileSystem};
use crate::observe::{PathObserver, Subscription};
use crate::tail::{
    ChildFilter, DirectoryTail, EventSink, FileTail, StartMode, UnitExit, run_directory_tail,
    run_file_tail,
};
use crate::types::{ClientId, Delivery, TargetKind};

/// What a client asked to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRecord {
    pub client_id: ClientId,
    pub path: PathBuf,
    pub kind: TargetKind,
}

/// Internal handle for a running unit.
///
/// - `cancel` asks the unit's loop to finish.
/// - `handle` is the Tokio task running the loop.
#[derive(Debug)]
struct UnitHandle {
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl UnitHandle {
    fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            // The unit may already have finished on its own.
            let _ = tx.send(());
        }
    }

    fn abort(self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
struct TableInner {
    next_id: ClientId,
    records: HashMap<ClientId, WatchRecord>,
    units: BTreeMap<(ClientId, PathBuf), UnitHandle>,
    /// `None` once the table has been shut down.
    deliveries: Option<mpsc::Sender<Delivery>>,
}

impl TableInner {
    fn allocate_id(&mut self) -> Result<ClientId> {
        if self.next_id == ClientId::MAX {
            return Err(TailorError::ClientIdsExhausted);
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn take_units(&mut self, client_id: ClientId) -> Vec<UnitHandle> {
        let keys: Vec<(ClientId, PathBuf)> = self
            .units
            .range((client_id, PathBuf::new())..)
            .take_while(|((id, _), _)| *id == client_id)
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter().filter_map(|key| self.units.remove(key)).collect()
    }
}

/// Collaborators the table needs to start units.
#[derive(Debug, Clone)]
pub struct TableDeps {
    pub fs: Arc<dyn FileSystem>,
    pub observer: Arc<dyn PathObserver>,
    pub filter: ChildFilter,
    pub read_chunk_bytes: u64,
    /// Idle period after which units re-check their path unprompted.
    pub resync_interval: Option<Duration>,
}

#[derive(Debug)]
pub struct RegistrationTable {
    inner: RwLock<TableInner>,
    deps: TableDeps,
    runtime: Handle,
    me: Weak<RegistrationTable>,
}

impl RegistrationTable {
    pub fn new(deps: TableDeps, runtime: Handle, deliveries: mpsc::Sender<Delivery>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            inner: RwLock::new(TableInner {
                next_id: 0,
                records: HashMap::new(),
                units: BTreeMap::new(),
                deliveries: Some(deliveries),
            }),
            deps,
            runtime,
            me: me.clone(),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a watch on `path` and start its unit.
    ///
    /// Validation (existence, type, readability, observer setup) happens
    /// before an id is allocated, so failures never consume ids.
    pub fn add(&self, path: &Path) -> Result<ClientId> {
        let canonical = self
            .deps
            .fs
            .canonicalize(path)
            .map_err(|err| TailorError::from_fs(path, err))?;

        let meta = self
            .deps
            .fs
            .metadata(&canonical)
            .map_err(|err| TailorError::from_fs(path, err))?
            .ok_or_else(|| TailorError::PathNotFound(path.to_path_buf()))?;

        let kind = match meta.kind {
            EntryKind::File => TargetKind::File,
            EntryKind::Dir => TargetKind::Directory,
            EntryKind::Other => return Err(TailorError::UnsupportedTarget(path.to_path_buf())),
        };

        // Reading nothing still opens the target, which surfaces permission
        // problems now rather than on the first change.
        let probe = match kind {
            TargetKind::File => self.deps.fs.read_range(&canonical, 0, 0).map(|_| ()),
            TargetKind::Directory => self.deps.fs.read_dir(&canonical).map(|_| ()),
        };
        probe.map_err(|err| TailorError::from_fs(path, err))?;

        let subscription = self
            .deps
            .observer
            .subscribe(&canonical, kind)
            .map_err(|err| TailorError::ObserverFailed {
                path: path.to_path_buf(),
                reason: format!("{err:#}"),
            })?
            .with_idle_resync(self.deps.resync_interval);

        let mut inner = self.write();
        let Some(tx) = inner.deliveries.clone() else {
            return Err(TailorError::EngineDestroyed);
        };
        let client_id = inner.allocate_id()?;

        let unit = self.spawn_unit(
            client_id,
            canonical.clone(),
            kind,
            StartMode::Backfill,
            true,
            subscription,
            tx,
        );
        inner.records.insert(
            client_id,
            WatchRecord {
                client_id,
                path: canonical.clone(),
                kind,
            },
        );
        inner.units.insert((client_id, canonical.clone()), unit);
        drop(inner);

        info!(client_id, path = ?canonical, %kind, "watch registered");
        Ok(client_id)
    }

    /// Unregister `client_id` and cancel all of its units.
    ///
    /// Returns false if the id is unknown or already removed. Once this
    /// returns, [`is_active`](Self::is_active) is false for the id.
    pub fn remove(&self, client_id: ClientId) -> bool {
        let mut inner = self.write();
        let Some(record) = inner.records.remove(&client_id) else {
            return false;
        };
        let units = inner.take_units(client_id);
        drop(inner);

        let count = units.len();
        for unit in units {
            unit.cancel();
        }
        info!(client_id, path = ?record.path, units = count, "watch removed");
        true
    }

    /// Remove a client whose root unit failed.
    pub fn retire(&self, client_id: ClientId, reason: &str) {
        if self.remove(client_id) {
            warn!(client_id, %reason, "watch retired after observer failure");
        }
    }

    pub fn is_active(&self, client_id: ClientId) -> bool {
        self.read().records.contains_key(&client_id)
    }

    pub fn record(&self, client_id: ClientId) -> Option<WatchRecord> {
        self.read().records.get(&client_id).cloned()
    }

    /// Ids of all active clients, ascending.
    pub fn active_clients(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.read().records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of running units belonging to `client_id`.
    pub fn unit_count(&self, client_id: ClientId) -> usize {
        self.read()
            .units
            .range((client_id, PathBuf::new())..)
            .take_while(|((id, _), _)| *id == client_id)
            .count()
    }

    /// Start a child file tail for a directory client.
    ///
    /// Returns `Ok(false)` when the child is already tailed, is not a regular
    /// file, or the client is gone.
    pub fn attach_child(
        &self,
        client_id: ClientId,
        child: &Path,
        mode: StartMode,
    ) -> anyhow::Result<bool> {
        let key = (client_id, child.to_path_buf());
        {
            let inner = self.read();
            if !inner.records.contains_key(&client_id) || inner.units.contains_key(&key) {
                return Ok(false);
            }
        }

        match self.deps.fs.metadata(child)? {
            Some(meta) if meta.kind == EntryKind::File => {}
            _ => return Ok(false),
        }

        let subscription = self
            .deps
            .observer
            .subscribe(child, TargetKind::File)?
            .with_idle_resync(self.deps.resync_interval);

        let mut inner = self.write();
        // Re-check: the client may have been stopped or the child attached
        // by a concurrent report while we were subscribing.
        if !inner.records.contains_key(&client_id) || inner.units.contains_key(&key) {
            return Ok(false);
        }
        let Some(tx) = inner.deliveries.clone() else {
            return Ok(false);
        };

        let unit = self.spawn_unit(
            client_id,
            child.to_path_buf(),
            TargetKind::File,
            mode,
            false,
            subscription,
            tx,
        );
        inner.units.insert(key, unit);
        Ok(true)
    }

    /// Forget a child unit that ended on its own so it can be re-attached.
    fn detach_child(&self, client_id: ClientId, child: &Path) {
        let removed = self
            .write()
            .units
            .remove(&(client_id, child.to_path_buf()));
        if removed.is_some() {
            debug!(client_id, child = ?child, "directory child detached");
        }
    }

    /// Drop every client and unit and close the delivery channel.
    ///
    /// Returns how many clients were still active.
    pub fn shutdown(&self) -> usize {
        let mut inner = self.write();
        inner.deliveries = None;
        let clients = inner.records.len();
        inner.records.clear();
        let units = std::mem::take(&mut inner.units);
        drop(inner);

        for (_, unit) in units {
            unit.abort();
        }
        clients
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_unit(
        &self,
        client_id: ClientId,
        path: PathBuf,
        kind: TargetKind,
        mode: StartMode,
        root: bool,
        subscription: Subscription,
        tx: mpsc::Sender<Delivery>,
    ) -> UnitHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let table = self.me.clone();

        let handle = match kind {
            TargetKind::File => {
                let tail = FileTail::new(
                    client_id,
                    path.clone(),
                    Arc::clone(&self.deps.fs),
                    self.deps.read_chunk_bytes,
                );
                let sink = EventSink::new(client_id, tx);
                self.runtime.spawn(async move {
                    let exit = run_file_tail(tail, mode, subscription, cancel_rx, sink).await;
                    settle(&table, client_id, &path, root, exit);
                })
            }
            TargetKind::Directory => {
                let dir = DirectoryTail::new(
                    client_id,
                    path.clone(),
                    Arc::clone(&self.deps.fs),
                    self.deps.filter.clone(),
                );
                let attach_table = table.clone();
                let attach = move |child: &Path, mode: StartMode| match attach_table.upgrade() {
                    Some(table) => table.attach_child(client_id, child, mode),
                    None => Err(anyhow!("registration table dropped")),
                };
                // The directory unit does not deliver events itself.
                drop(tx);
                self.runtime.spawn(async move {
                    let exit = run_directory_tail(dir, subscription, cancel_rx, attach).await;
                    settle(&table, client_id, &path, root, exit);
                })
            }
        };

        UnitHandle {
            cancel: Some(cancel_tx),
            handle,
        }
    }
}

/// Book-keeping after a unit's loop returns.
fn settle(
    table: &Weak<RegistrationTable>,
    client_id: ClientId,
    path: &Path,
    root: bool,
    exit: UnitExit,
) {
    if !exit.is_fault() {
        return;
    }
    let Some(table) = table.upgrade() else {
        return;
    };

    let reason = match &exit {
        UnitExit::ObserverFailed(reason) => reason.clone(),
        _ => "observer stream closed".to_string(),
    };

    if root {
        table.retire(client_id, &reason);
    } else {
        warn!(client_id, child = ?path, %reason, "directory child stopped after observer failure");
        table.detach_child(client_id, path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::observe::ManualObserver;

    struct Fixture {
        fs: MockFileSystem,
        observer: ManualObserver,
        table: Arc<RegistrationTable>,
        _rx: mpsc::Receiver<Delivery>,
    }

    fn fixture() -> Fixture {
        let fs = MockFileSystem::new();
        let observer = ManualObserver::new();
        let (tx, rx) = mpsc::channel(16);
        let deps = TableDeps {
            fs: Arc::new(fs.clone()),
            observer: Arc::new(observer.clone()),
            filter: ChildFilter::allow_all(),
            read_chunk_bytes: 1024,
            resync_interval: None,
        };
        let table = RegistrationTable::new(deps, Handle::current(), tx);
        Fixture {
            fs,
            observer,
            table,
            _rx: rx,
        }
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_failures_consume_none() {
        let f = fixture();
        f.fs.add_file("/a.log", "");
        f.fs.add_file("/b.log", "");

        assert_eq!(f.table.add(Path::new("/a.log")).unwrap(), 0);
        assert!(matches!(
            f.table.add(Path::new("/missing.log")),
            Err(TailorError::PathNotFound(_))
        ));
        assert_eq!(f.table.add(Path::new("/b.log")).unwrap(), 1);

        assert!(f.table.remove(0));
        assert_eq!(f.table.add(Path::new("/a.log")).unwrap(), 2);
        assert_eq!(f.table.active_clients(), vec![1, 2]);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_releases_subscriptions() {
        let f = fixture();
        f.fs.add_file("/a.log", "");
        let id = f.table.add(Path::new("/a.log")).unwrap();
        assert!(f.table.is_active(id));
        assert_eq!(f.observer.subscriber_count("/a.log"), 1);

        assert!(f.table.remove(id));
        assert!(!f.table.is_active(id));
        assert!(!f.table.remove(id));
        assert!(!f.table.remove(42));

        // The unit drops its subscription once it sees the cancel.
        for _ in 0..100 {
            if f.observer.subscriber_count("/a.log") == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(f.observer.subscriber_count("/a.log"), 0);
    }

    #[tokio::test]
    async fn registration_errors_are_classified() {
        let f = fixture();
        f.fs.add_file("/secret.log", "");
        f.fs.deny("/secret.log");
        f.fs.add_file("/refused.log", "");
        f.observer.refuse("/refused.log");

        assert!(matches!(
            f.table.add(Path::new("/secret.log")),
            Err(TailorError::PermissionDenied(_))
        ));
        assert!(matches!(
            f.table.add(Path::new("/refused.log")),
            Err(TailorError::ObserverFailed { .. })
        ));
        assert!(f.table.active_clients().is_empty());
    }

    #[tokio::test]
    async fn exhausted_id_space_is_reported() {
        let f = fixture();
        f.fs.add_file("/a.log", "");
        f.table.write().next_id = ClientId::MAX;
        assert!(matches!(
            f.table.add(Path::new("/a.log")),
            Err(TailorError::ClientIdsExhausted)
        ));
    }

    #[tokio::test]
    async fn children_are_attached_once() {
        let f = fixture();
        f.fs.add_dir("/logs");
        let id = f.table.add(Path::new("/logs")).unwrap();

        f.fs.add_file("/logs/x.log", "");
        f.table
            .attach_child(id, Path::new("/logs/x.log"), StartMode::Fresh)
            .unwrap();
        assert!(!f.table.attach_child(id, Path::new("/logs/x.log"), StartMode::Fresh).unwrap());
        assert!(!f.table.attach_child(id, Path::new("/logs/none.log"), StartMode::Fresh).unwrap());
        assert_eq!(f.table.unit_count(id), 2);

        assert!(f.table.remove(id));
        assert_eq!(f.table.unit_count(id), 0);
        assert!(!f.table.attach_child(id, Path::new("/logs/x.log"), StartMode::Fresh).unwrap());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_watches() {
        let f = fixture();
        f.fs.add_file("/a.log", "");
        f.table.add(Path::new("/a.log")).unwrap();

        assert_eq!(f.table.shutdown(), 1);
        assert!(matches!(
            f.table.add(Path::new("/a.log")),
            Err(TailorError::EngineDestroyed)
        ));
    }
}

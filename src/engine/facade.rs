// src/engine/facade.rs

//! Public engine object.
//!
//! A [`Tailor`] owns a Tokio runtime for its tailing units, the registration
//! table, and the dispatcher thread. All of its methods are synchronous.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::dispatcher::{Dispatcher, NewLinesCallback};
use crate::engine::registry::{RegistrationTable, TableDeps, WatchRecord};
use crate::errors::{Result, TailorError};
use crate::fs::{FileSystem, RealFileSystem};
use crate::observe::{NotifyObserver, PathObserver};
use crate::tail::ChildFilter;
use crate::types::{ClientId, INVALID_CLIENT_ID, MessageType};

/// Builder for [`Tailor`].
///
/// The filesystem and observer default to the real ones; tests swap in
/// [`MockFileSystem`](crate::fs::mock::MockFileSystem) and
/// [`ManualObserver`](crate::observe::ManualObserver).
#[derive(Default)]
pub struct TailorBuilder {
    config: EngineConfig,
    fs: Option<Arc<dyn FileSystem>>,
    observer: Option<Arc<dyn PathObserver>>,
    callback: Option<NewLinesCallback>,
}

impl TailorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PathObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Install the new-lines callback before any watch exists.
    pub fn on_new_lines<F>(mut self, callback: F) -> Self
    where
        F: Fn(ClientId, MessageType, &[String]) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<Tailor> {
        let config = self.config;
        let filter = ChildFilter::new(&config.directory_ignore)
            .map_err(|err| TailorError::ConfigError(format!("{err:#}")))?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("tailor-worker")
            .enable_all()
            .build()?;

        let fs = self.fs.unwrap_or_else(|| Arc::new(RealFileSystem));
        let observer = self.observer.unwrap_or_else(|| {
            Arc::new(NotifyObserver::new(
                config.observer,
                config.poll_interval,
                Arc::clone(&fs),
            ))
        });

        let (tx, rx) = mpsc::channel(config.dispatch_queue_capacity.max(1));
        let deps = TableDeps {
            fs,
            observer,
            filter,
            read_chunk_bytes: config.read_chunk_bytes,
            resync_interval: config.resync_interval,
        };
        let table = RegistrationTable::new(deps, runtime.handle().clone(), tx);
        let dispatcher = Dispatcher::spawn(rx, Arc::clone(&table), self.callback)?;

        info!(
            observer = ?config.observer,
            workers = config.worker_threads,
            queue = config.dispatch_queue_capacity,
            "tailor engine initialised"
        );

        Ok(Tailor {
            table,
            dispatcher,
            runtime: Mutex::new(Some(runtime)),
            shutdown_timeout: config.shutdown_timeout,
            destroyed: AtomicBool::new(false),
        })
    }
}

/// A tailing engine.
///
/// Each successful [`watch`](Tailor::watch) yields a [`ClientId`]; every
/// batch of lines for that watch is passed to the new-lines callback on a
/// single dispatcher thread, in file order.
///
/// Dropping the engine destroys it.
#[derive(Debug)]
pub struct Tailor {
    table: Arc<RegistrationTable>,
    dispatcher: Dispatcher,
    runtime: Mutex<Option<Runtime>>,
    shutdown_timeout: Duration,
    destroyed: AtomicBool,
}

impl Tailor {
    /// Engine with default configuration, real filesystem and native observer.
    pub fn new() -> Result<Self> {
        TailorBuilder::new().build()
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        TailorBuilder::new().config(config).build()
    }

    pub fn builder() -> TailorBuilder {
        TailorBuilder::new()
    }

    /// Install or replace the new-lines callback.
    ///
    /// When this returns, the previous callback is not running and will not
    /// be called again (unless this is called from inside it).
    pub fn set_new_lines_callback<F>(&self, callback: F)
    where
        F: Fn(ClientId, MessageType, &[String]) + Send + Sync + 'static,
    {
        self.dispatcher.set_callback(Some(Arc::new(callback)));
        debug!("new-lines callback replaced");
    }

    /// Remove the callback; deliveries are dropped until a new one is set.
    pub fn clear_new_lines_callback(&self) {
        self.dispatcher.set_callback(None);
    }

    /// Start following `path` (a regular file or a directory).
    pub fn watch(&self, path: impl AsRef<Path>) -> Result<ClientId> {
        if self.is_destroyed() {
            return Err(TailorError::EngineDestroyed);
        }
        self.table.add(path.as_ref())
    }

    /// Like [`watch`](Tailor::watch), but reports failure as
    /// [`INVALID_CLIENT_ID`].
    pub fn watch_path(&self, path: impl AsRef<Path>) -> ClientId {
        let path = path.as_ref();
        match self.watch(path) {
            Ok(id) => id,
            Err(err) => {
                warn!(path = ?path, error = %err, "watch failed");
                INVALID_CLIENT_ID
            }
        }
    }

    /// Stop a watch. Returns false for unknown or already stopped ids.
    ///
    /// Once this returns true, the callback is never invoked for `client_id`
    /// again, and no delivery for it is still running (unless called from
    /// inside the callback).
    pub fn stop(&self, client_id: ClientId) -> bool {
        if !self.table.remove(client_id) {
            debug!(client_id, "stop for unknown client");
            return false;
        }
        self.dispatcher.barrier();
        true
    }

    pub fn active_clients(&self) -> Vec<ClientId> {
        self.table.active_clients()
    }

    pub fn watch_record(&self, client_id: ClientId) -> Option<WatchRecord> {
        self.table.record(client_id)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Stop every watch and release all resources. Idempotent.
    ///
    /// Blocks until in-flight deliveries are finished or discarded, except
    /// when called from inside the callback.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let clients = self.table.shutdown();
        self.dispatcher.barrier();

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            if Handle::try_current().is_ok() {
                // Blocking shutdown is not allowed from async context.
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(self.shutdown_timeout);
            }
        }

        self.dispatcher.join();
        info!(clients, "tailor engine destroyed");
    }
}

impl Drop for Tailor {
    fn drop(&mut self) {
        self.destroy();
    }
}

// src/api.rs

//! Handle-based surface for callers that cannot hold a [`Tailor`] directly.
//!
//! Engines live in a process-wide arena and are addressed by an opaque
//! [`EngineHandle`]. Every operation on an unknown or destroyed handle is a
//! harmless no-op that reports failure.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::Tailor;
use crate::types::{ClientId, INVALID_CLIENT_ID};

/// Opaque reference to an engine created by [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(u64);

impl EngineHandle {
    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

static ENGINES: LazyLock<Mutex<HashMap<u64, Arc<Tailor>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn engines() -> MutexGuard<'static, HashMap<u64, Arc<Tailor>>> {
    ENGINES.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lookup(handle: EngineHandle) -> Option<Arc<Tailor>> {
    engines().get(&handle.0).cloned()
}

/// Create an engine with the default configuration.
pub fn init() -> Option<EngineHandle> {
    init_with_config(EngineConfig::default())
}

pub fn init_with_config(config: EngineConfig) -> Option<EngineHandle> {
    match Tailor::with_config(config) {
        Ok(tailor) => {
            let raw = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
            engines().insert(raw, Arc::new(tailor));
            debug!(handle = raw, "engine registered");
            Some(EngineHandle(raw))
        }
        Err(err) => {
            warn!(error = %err, "engine initialisation failed");
            None
        }
    }
}

/// Destroy the engine behind `handle`. Unknown handles are ignored.
pub fn destroy(handle: EngineHandle) {
    let removed = engines().remove(&handle.0);
    match removed {
        Some(tailor) => tailor.destroy(),
        None => debug!(handle = handle.0, "destroy for unknown engine handle"),
    }
}

/// Install or replace the callback. `msg_type` is passed as its wire value
/// ([`NEW_FILE_STARTED`](crate::types::NEW_FILE_STARTED) or
/// [`NEW_LINES_ADDED`](crate::types::NEW_LINES_ADDED)).
pub fn set_new_lines_callback<F>(handle: EngineHandle, callback: F) -> bool
where
    F: Fn(ClientId, u32, &[String]) + Send + Sync + 'static,
{
    let Some(tailor) = lookup(handle) else {
        return false;
    };
    tailor.set_new_lines_callback(move |id, msg_type, lines| callback(id, msg_type.as_u32(), lines));
    true
}

/// Watch `path`; [`INVALID_CLIENT_ID`] on any failure.
pub fn watch(handle: EngineHandle, path: impl AsRef<Path>) -> ClientId {
    match lookup(handle) {
        Some(tailor) => tailor.watch_path(path),
        None => INVALID_CLIENT_ID,
    }
}

pub fn stop(handle: EngineHandle, client_id: ClientId) -> bool {
    match lookup(handle) {
        Some(tailor) => tailor.stop(client_id),
        None => false,
    }
}

// src/engine/dispatcher.rs

//! Single-threaded delivery of events to the user callback.
//!
//! All callback invocations happen on one dedicated thread, in queue order,
//! so the callback never runs concurrently with itself. Each delivery holds
//! the delivery gate while it checks that its client is still registered and
//! invokes the callback. `stop` and callback replacement pass through the
//! same gate after updating state ([`Dispatcher::barrier`]), which is what
//! guarantees that nothing is delivered for a stopped client, or to a
//! replaced callback, once those calls return.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::engine::registry::RegistrationTable;
use crate::errors::Result;
use crate::types::{ClientId, Delivery, MessageType};

/// The new-lines callback as stored by the engine.
pub type NewLinesCallback = Arc<dyn Fn(ClientId, MessageType, &[String]) + Send + Sync>;

struct Shared {
    gate: Mutex<()>,
    callback: RwLock<Option<NewLinesCallback>>,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    thread_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Start the dispatcher thread. It runs until every sender of `rx` is
    /// dropped and the queue is drained.
    pub fn spawn(
        mut rx: mpsc::Receiver<Delivery>,
        table: Arc<RegistrationTable>,
        callback: Option<NewLinesCallback>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            gate: Mutex::new(()),
            callback: RwLock::new(callback),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("tailor-dispatch".to_string())
            .spawn(move || {
                info!("dispatcher started");
                while let Some(delivery) = rx.blocking_recv() {
                    deliver(&worker_shared, &table, delivery);
                }
                info!("dispatcher finished (channel closed)");
            })?;

        Ok(Self {
            shared,
            thread_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Replace (or clear) the callback.
    ///
    /// Unless called from the callback itself, this waits for an in-flight
    /// delivery to the previous callback to finish.
    pub fn set_callback(&self, callback: Option<NewLinesCallback>) {
        *self
            .shared
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callback;
        self.barrier();
    }

    pub fn has_callback(&self) -> bool {
        self.shared
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Wait until no delivery that started before this call is still running.
    ///
    /// No-op on the dispatcher thread: the delivery in progress is the
    /// caller's own.
    pub fn barrier(&self) {
        if self.on_dispatch_thread() {
            return;
        }
        drop(self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn on_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Wait for the dispatcher thread to drain its queue and exit.
    ///
    /// Only returns once all senders are gone. Skipped on the dispatcher
    /// thread, which would otherwise wait for itself.
    pub fn join(&self) {
        if self.on_dispatch_thread() {
            debug!("join requested from the dispatcher thread; detaching");
            return;
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
    }
}

fn deliver(shared: &Shared, table: &RegistrationTable, delivery: Delivery) {
    let _gate = shared.gate.lock().unwrap_or_else(PoisonError::into_inner);

    let client_id = delivery.client_id;
    if !table.is_active(client_id) {
        trace!(client_id, "dropping delivery for inactive client");
        return;
    }

    let callback = shared
        .callback
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let Some(callback) = callback else {
        trace!(client_id, "no callback installed; dropping delivery");
        return;
    };

    let message_type = delivery.event.message_type();
    let lines = delivery.event.lines();
    trace!(client_id, ?message_type, lines = lines.len(), "delivering");

    let outcome = catch_unwind(AssertUnwindSafe(|| callback(client_id, message_type, lines)));
    if outcome.is_err() {
        error!(client_id, ?message_type, "new-lines callback panicked");
    }
}

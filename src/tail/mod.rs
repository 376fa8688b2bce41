// src/tail/mod.rs

//! Tailing units.
//!
//! A unit follows one path for one client:
//! - [`file::FileTail`] follows a regular file (growth, truncation, rotation).
//! - [`directory::DirectoryTail`] follows a directory and asks for a child
//!   `FileTail` for every file that shows up in it.
//!
//! Both are split in two layers, like the engine core: a synchronous state
//! machine that turns observer changes into [`Event`]s, and an async loop
//! (`run_*`) that feeds it from a [`Subscription`](crate::observe::Subscription)
//! and hands the events to the dispatcher through an [`EventSink`].

pub mod directory;
pub mod file;
pub mod filter;
pub mod splitter;

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{ClientId, Delivery, Event};

pub use directory::{DirectoryTail, run_directory_tail};
pub use file::{FileTail, TailState, run_file_tail};
pub use filter::ChildFilter;
pub use splitter::LineSplitter;

/// How a file unit treats content that exists when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// The file existed when the watch was established: its complete lines
    /// are delivered inside the `NewFileStarted` event.
    Backfill,
    /// The file appeared afterwards: `NewFileStarted` is empty and the whole
    /// content follows as `NewLinesAdded`.
    Fresh,
}

/// Why a unit's loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExit {
    /// Stopped on request (`stop`, `destroy`, or its handle was dropped).
    Cancelled,
    /// The observer reported an unrecoverable failure.
    ObserverFailed(String),
    /// The observer stream ended without being asked to.
    ObserverClosed,
    /// Nobody is listening for deliveries any more.
    DispatcherClosed,
}

impl UnitExit {
    /// Whether the exit was caused by the observer rather than a request.
    pub fn is_fault(&self) -> bool {
        matches!(self, UnitExit::ObserverFailed(_) | UnitExit::ObserverClosed)
    }
}

/// Hand-off from a unit to the dispatcher, tagging events with the client id.
#[derive(Debug, Clone)]
pub struct EventSink {
    client_id: ClientId,
    tx: mpsc::Sender<Delivery>,
}

impl EventSink {
    pub fn new(client_id: ClientId, tx: mpsc::Sender<Delivery>) -> Self {
        Self { client_id, tx }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Queue `events` in order. Returns false once the dispatcher is gone.
    pub async fn emit(&self, events: Vec<Event>) -> bool {
        for event in events {
            let delivery = Delivery {
                client_id: self.client_id,
                event,
            };
            if self.tx.send(delivery).await.is_err() {
                debug!(client_id = self.client_id, "dispatcher channel closed");
                return false;
            }
        }
        true
    }
}

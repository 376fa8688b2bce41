// src/engine/mod.rs

//! The tailing engine.
//!
//! This module ties together:
//! - the registration table (client ids, records, running units)
//! - the dispatcher (single-threaded, gated delivery to the callback)
//! - the facade that owns the runtime and exposes watch/stop/destroy
//!
//! The tailing state machines themselves live in [`crate::tail`].

pub mod dispatcher;
pub mod facade;
pub mod registry;

pub use dispatcher::{Dispatcher, NewLinesCallback};
pub use facade::{Tailor, TailorBuilder};
pub use registry::{RegistrationTable, TableDeps, WatchRecord};

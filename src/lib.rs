// src/lib.rs

pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod observe;
pub mod output;
pub mod tail;
pub mod types;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::{EngineConfig, load_or_default};
use crate::output::LinePrinter;
use crate::types::ObserverBackend;

pub use crate::engine::{Tailor, TailorBuilder};
pub use crate::errors::TailorError;
pub use crate::types::{ClientId, INVALID_CLIENT_ID, MessageType, NEW_FILE_STARTED, NEW_LINES_ADDED};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the engine and its stdout printer
/// - one watch per path argument
/// - Ctrl-C handling
pub fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(args.config.as_deref()).context("loading configuration")?;

    let mut engine_cfg = EngineConfig::from(&cfg);
    if args.poll {
        engine_cfg.observer = ObserverBackend::Poll;
    }

    let printer = LinePrinter::new(args.highlight, args.paths.len() > 1, args.lines);
    let tailor = Tailor::builder()
        .config(engine_cfg)
        .on_new_lines(move |id, msg_type, lines| printer.print(id, msg_type, lines))
        .build()
        .context("starting engine")?;

    for path in &args.paths {
        let id = tailor
            .watch(path)
            .with_context(|| format!("watching {}", path.display()))?;
        info!(client_id = id, path = ?path, "following");
    }

    // A small runtime of our own just to wait for the signal; the engine's
    // runtime is internal to it.
    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    signals
        .block_on(tokio::signal::ctrl_c())
        .context("waiting for Ctrl-C")?;
    drop(signals);

    info!("Ctrl-C received; stopping watches");
    for id in tailor.active_clients() {
        if !tailor.stop(id) {
            warn!(client_id = id, "watch was already gone");
        }
    }
    tailor.destroy();

    Ok(())
}

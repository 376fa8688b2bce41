// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `tailor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tailor",
    version,
    about = "Follow files and directories, printing lines as they are appended.",
    long_about = None
)]
pub struct CliArgs {
    /// Files or directories to follow.
    ///
    /// A directory follows every regular file directly inside it, including
    /// files created later.
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Path to the config file (TOML).
    ///
    /// Default: `Tailor.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Use the polling observer instead of native OS notifications.
    #[arg(long)]
    pub poll: bool,

    /// How many existing lines of each file to print at start.
    #[arg(short = 'n', long, value_name = "N", default_value_t = 10)]
    pub lines: usize,

    /// Colour lines by severity keyword (ERROR, WARN, DEBUG).
    #[arg(long)]
    pub highlight: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TAILOR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

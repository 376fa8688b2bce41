// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TailorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Path not found: {0:?}")]
    PathNotFound(PathBuf),

    #[error("Permission denied: {0:?}")]
    PermissionDenied(PathBuf),

    #[error("Neither a regular file nor a directory: {0:?}")]
    UnsupportedTarget(PathBuf),

    #[error("Could not observe {path:?}: {reason}")]
    ObserverFailed { path: PathBuf, reason: String },

    #[error("Client id space exhausted")]
    ClientIdsExhausted,

    #[error("Engine has been destroyed")]
    EngineDestroyed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TailorError {
    /// Classify a filesystem failure for `path`.
    ///
    /// Walks the `anyhow` chain looking for an `io::Error` so that context
    /// added by the `fs` layer does not hide `NotFound` / `PermissionDenied`.
    pub fn from_fs(path: &Path, err: anyhow::Error) -> Self {
        let kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<io::Error>())
            .map(io::Error::kind);

        match kind {
            Some(io::ErrorKind::NotFound) => TailorError::PathNotFound(path.to_path_buf()),
            Some(io::ErrorKind::PermissionDenied) => {
                TailorError::PermissionDenied(path.to_path_buf())
            }
            _ => TailorError::Other(err),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TailorError>;

//! Real-filesystem mutations used by integration tests.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Create (or overwrite) `path` with `content`.
pub fn write(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, content).with_context(|| format!("writing {:?}", path))
}

/// Append `content` and flush.
pub fn append(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("opening {:?} for append", path))?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Truncate `path` in place to zero length.
pub fn truncate(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("truncating {:?}", path))?;
    Ok(())
}

/// Logrotate-style rotation: move `path` to `path.1` and create a new file
/// with `content` under the old name. Returns the rotated-away path.
pub fn rotate(path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(".1");
    let rotated = PathBuf::from(rotated);
    fs::rename(path, &rotated).with_context(|| format!("rotating {:?}", path))?;
    write(path, content)?;
    Ok(rotated)
}

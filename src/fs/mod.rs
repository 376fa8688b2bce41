// src/fs/mod.rs

//! Filesystem access used by the tailing units.
//!
//! Everything the engine learns about a watched file (its identity, its
//! length, its bytes) goes through [`FileSystem`], so the state machines can
//! be driven against [`mock::MockFileSystem`] in tests.

use std::fmt::Debug;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod mock;

/// Identity of a file independent of its name (device + inode on Unix).
///
/// Two different files that successively live at the same path have
/// different ids; that is how rotation is told apart from growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    device: u64,
    inode: u64,
}

impl FileId {
    pub const fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }

    #[cfg(unix)]
    pub fn of(meta: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self::new(meta.dev(), meta.ino())
    }

    #[cfg(not(unix))]
    pub fn of(meta: &fs::Metadata) -> Self {
        // No stable inode on this platform; creation time changes whenever
        // a file is recreated under the same name.
        let created = meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(saturating_nanos)
            .unwrap_or(0);
        Self::new(0, created)
    }
}

/// Nanoseconds in `d`, clamped to `u64::MAX` instead of wrapping.
#[cfg_attr(unix, allow(dead_code))]
fn saturating_nanos(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// Snapshot of a path's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub id: FileId,
    pub len: u64,
    pub kind: EntryKind,
}

/// Bytes read from a file, together with the identity of the file that was
/// actually opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: FileId,
    pub bytes: Vec<u8>,
}

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    /// Metadata for `path`, or `None` when nothing exists there.
    fn metadata(&self, path: &Path) -> Result<Option<FileMeta>>;

    /// Read at most `max_len` bytes starting at `offset`.
    ///
    /// Returns `None` when the file does not exist. A file shorter than
    /// `offset + max_len` yields a short chunk.
    fn read_range(&self, path: &Path, offset: u64, max_len: u64) -> Result<Option<Chunk>>;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn metadata(&self, path: &Path) -> Result<Option<FileMeta>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(meta_from_std(&meta))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading metadata of {:?}", path)),
        }
    }

    fn read_range(&self, path: &Path, offset: u64, max_len: u64) -> Result<Option<Chunk>> {
        let mut file = match fs::File::open(path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("opening file {:?}", path)),
        };

        let meta = file
            .metadata()
            .with_context(|| format!("reading metadata of open file {:?}", path))?;
        let id = FileId::of(&meta);

        let mut bytes = Vec::new();
        if max_len > 0 && offset < meta.len() {
            file.seek(SeekFrom::Start(offset))
                .with_context(|| format!("seeking {:?} to {}", path, offset))?;
            file.take(max_len)
                .read_to_end(&mut bytes)
                .with_context(|| format!("reading {:?}", path))?;
        }

        Ok(Some(Chunk { id, bytes }))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        entries.sort();
        Ok(entries)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).with_context(|| format!("canonicalizing {:?}", path))
    }
}

fn meta_from_std(meta: &fs::Metadata) -> FileMeta {
    let kind = if meta.is_file() {
        EntryKind::File
    } else if meta.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::Other
    };

    FileMeta {
        id: FileId::of(meta),
        len: meta.len(),
        kind,
    }
}

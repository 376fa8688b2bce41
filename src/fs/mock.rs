// src/fs/mock.rs

use super::{Chunk, EntryKind, FileId, FileMeta, FileSystem};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File { id: FileId, data: Vec<u8> },
    Dir(Vec<String>), // List of child names
}

#[derive(Debug, Default)]
struct MockState {
    entries: HashMap<PathBuf, MockEntry>,
    denied: HashSet<PathBuf>,
    next_inode: u64,
}

/// In-memory filesystem whose files can be appended to, truncated, replaced
/// (new identity under the same name) and removed.
///
/// Paths are used verbatim; `canonicalize` only checks existence.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or recreate) a file with fresh identity.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) -> FileId {
        let path = path.as_ref().to_path_buf();
        let mut state = self.lock();
        state.next_inode += 1;
        let id = FileId::new(1, state.next_inode);
        state.entries.insert(
            path.clone(),
            MockEntry::File {
                id,
                data: content.into(),
            },
        );
        Self::link_into_parent(&mut state, &path);
        id
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.lock();
        state
            .entries
            .entry(path.clone())
            .or_insert_with(|| MockEntry::Dir(Vec::new()));
        Self::link_into_parent(&mut state, &path);
    }

    /// Append bytes to an existing file, keeping its identity.
    pub fn append(&self, path: impl AsRef<Path>, bytes: impl AsRef<[u8]>) {
        let mut state = self.lock();
        if let Some(MockEntry::File { data, .. }) = state.entries.get_mut(path.as_ref()) {
            data.extend_from_slice(bytes.as_ref());
        }
    }

    /// Truncate in place (same identity), like `truncate -s <len>`.
    pub fn truncate(&self, path: impl AsRef<Path>, len: usize) {
        let mut state = self.lock();
        if let Some(MockEntry::File { data, .. }) = state.entries.get_mut(path.as_ref()) {
            data.truncate(len);
        }
    }

    /// Replace the file with a new one under the same name, as a
    /// rename-and-recreate rotation would.
    pub fn replace(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) -> FileId {
        self.add_file(path, content)
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.lock();
        state.entries.remove(path);
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            if let Some(MockEntry::Dir(children)) = state.entries.get_mut(parent) {
                let name = name.to_string_lossy();
                children.retain(|c| *c != name);
            }
        }
    }

    /// Make every access to `path` fail with `PermissionDenied`.
    pub fn deny(&self, path: impl AsRef<Path>) {
        self.lock().denied.insert(path.as_ref().to_path_buf());
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.lock().entries.get(path.as_ref()) {
            Some(MockEntry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    fn link_into_parent(state: &mut MockState, path: &Path) {
        let Some(parent) = path.parent() else {
            return;
        };
        if parent.as_os_str().is_empty() || parent == path {
            return;
        }

        // Ensure parent directories exist implicitly for simplicity in this mock
        if !state.entries.contains_key(parent) {
            state
                .entries
                .insert(parent.to_path_buf(), MockEntry::Dir(Vec::new()));
            Self::link_into_parent(state, parent);
        }

        if let (Some(MockEntry::Dir(children)), Some(name)) =
            (state.entries.get_mut(parent), path.file_name())
        {
            let name = name.to_string_lossy().into_owned();
            if !children.contains(&name) {
                children.push(name);
            }
        }
    }

    fn check_access(state: &MockState, path: &Path) -> io::Result<()> {
        if state.denied.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("access to {:?} denied", path),
            ));
        }
        Ok(())
    }
}

impl FileSystem for MockFileSystem {
    fn metadata(&self, path: &Path) -> Result<Option<FileMeta>> {
        let state = self.lock();
        Self::check_access(&state, path)?;
        Ok(state.entries.get(path).map(|entry| match entry {
            MockEntry::File { id, data } => FileMeta {
                id: *id,
                len: data.len() as u64,
                kind: EntryKind::File,
            },
            MockEntry::Dir(_) => FileMeta {
                id: FileId::new(0, 0),
                len: 0,
                kind: EntryKind::Dir,
            },
        }))
    }

    fn read_range(&self, path: &Path, offset: u64, max_len: u64) -> Result<Option<Chunk>> {
        let state = self.lock();
        Self::check_access(&state, path)?;
        match state.entries.get(path) {
            Some(MockEntry::File { id, data }) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(max_len as usize).min(data.len());
                Ok(Some(Chunk {
                    id: *id,
                    bytes: data[start..end].to_vec(),
                }))
            }
            Some(MockEntry::Dir(_)) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{:?} is a directory", path),
            )
            .into()),
            None => Ok(None),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.lock();
        Self::check_access(&state, path)?;
        match state.entries.get(path) {
            Some(MockEntry::Dir(children)) => {
                let mut entries: Vec<PathBuf> =
                    children.iter().map(|name| path.join(name)).collect();
                entries.sort();
                Ok(entries)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory or not found: {:?}", path),
            )
            .into()),
        }
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        let state = self.lock();
        Self::check_access(&state, path)?;
        if state.entries.contains_key(path) {
            Ok(path.to_path_buf())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such path: {:?}", path),
            )
            .into())
        }
    }
}

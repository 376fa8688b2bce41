// src/tail/file.rs

//! Per-file watch state machine.
//!
//! `Starting -> Active -> Stopped`. While active, most observer changes are a
//! hint to re-stat the file: the recorded identity and `last_size` decide
//! whether the change is growth (read the new bytes), a rotation (identity
//! changed or the file shrank: start over from offset 0) or noise. A
//! `Replaced` report is always a rotation, since a truncate-and-rewrite can
//! leave both the identity and a larger size looking like plain growth.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::fs::{EntryKind, FileId, FileSystem};
use crate::observe::{PathChange, Subscription};
use crate::tail::splitter::LineSplitter;
use crate::tail::{EventSink, StartMode, UnitExit};
use crate::types::{ClientId, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Starting,
    Active,
    Stopped,
}

/// Tail of a single regular file.
#[derive(Debug)]
pub struct FileTail {
    client_id: ClientId,
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    read_chunk: u64,
    /// Identity of the file currently being followed, `None` while nothing
    /// exists at `path`.
    identity: Option<FileId>,
    /// Bytes of the current file already consumed.
    last_size: u64,
    splitter: LineSplitter,
    state: TailState,
}

impl FileTail {
    pub fn new(
        client_id: ClientId,
        path: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        read_chunk: u64,
    ) -> Self {
        Self {
            client_id,
            path: path.into(),
            fs,
            read_chunk: read_chunk.max(1),
            identity: None,
            last_size: 0,
            splitter: LineSplitter::new(),
            state: TailState::Starting,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    pub fn identity(&self) -> Option<FileId> {
        self.identity
    }

    pub fn last_size(&self) -> u64 {
        self.last_size
    }

    /// Leave `Starting`, returning the events that announce the file.
    ///
    /// A file that vanished before the unit started produces nothing; it is
    /// announced as a rotation once it reappears.
    pub fn start(&mut self, mode: StartMode) -> Vec<Event> {
        let mut events = Vec::new();
        if self.state != TailState::Starting {
            return events;
        }
        self.state = TailState::Active;

        let Some(id) = self.stat_file() else {
            debug!(client_id = self.client_id, path = ?self.path, "file missing at start");
            return events;
        };
        self.identity = Some(id);

        match mode {
            StartMode::Backfill => {
                let (lines, swapped) = self.read_available();
                debug!(
                    client_id = self.client_id,
                    path = ?self.path,
                    lines = lines.len(),
                    offset = self.last_size,
                    "backfill complete"
                );
                events.push(Event::NewFileStarted {
                    path: self.path.clone(),
                    lines,
                });
                if let Some(new_id) = swapped {
                    self.rotate(new_id, &mut events);
                    self.catch_up(&mut events);
                }
            }
            StartMode::Fresh => {
                events.push(Event::NewFileStarted {
                    path: self.path.clone(),
                    lines: Vec::new(),
                });
                self.catch_up(&mut events);
            }
        }
        events
    }

    /// Feed one observer change. Stopped tails ignore everything.
    pub fn on_change(&mut self, change: &PathChange) -> Vec<Event> {
        let mut events = Vec::new();
        if self.state != TailState::Active {
            trace!(client_id = self.client_id, ?change, "ignoring change in state {:?}", self.state);
            return events;
        }

        match change {
            PathChange::Removed => {
                // Keep identity and offset: a recreated file is a rotation.
                debug!(client_id = self.client_id, path = ?self.path, "file removed; waiting for it to reappear");
            }
            PathChange::Failed { reason } => {
                warn!(client_id = self.client_id, path = ?self.path, %reason, "observer failure reached file tail");
            }
            PathChange::Replaced => self.restart(&mut events),
            PathChange::Grew { .. } | PathChange::Rescan | PathChange::Created { .. } => {
                self.sync(&mut events)
            }
        }
        events
    }

    /// Move to `Stopped` and drop any partial line.
    pub fn stop(&mut self) {
        self.state = TailState::Stopped;
        self.splitter.reset();
    }

    /// Compare the file on disk with what was consumed so far.
    fn sync(&mut self, events: &mut Vec<Event>) {
        let Some(meta) = self.stat_meta() else {
            return;
        };

        if self.identity != Some(meta.id) {
            debug!(client_id = self.client_id, path = ?self.path, "file identity changed");
            self.rotate(meta.id, events);
        } else if meta.len < self.last_size {
            debug!(
                client_id = self.client_id,
                path = ?self.path,
                len = meta.len,
                last_size = self.last_size,
                "file shrank"
            );
            self.rotate(meta.id, events);
        }
        self.catch_up(events);
    }

    /// A new file now sits at the path, whatever its size says.
    fn restart(&mut self, events: &mut Vec<Event>) {
        let Some(meta) = self.stat_meta() else {
            // Nothing there yet; the next change re-checks the identity.
            debug!(client_id = self.client_id, path = ?self.path, "replacement reported but file is missing");
            return;
        };
        debug!(client_id = self.client_id, path = ?self.path, len = meta.len, "file replaced");
        self.rotate(meta.id, events);
        self.catch_up(events);
    }

    /// Announce a new file generation and restart from offset 0.
    fn rotate(&mut self, id: FileId, events: &mut Vec<Event>) {
        self.identity = Some(id);
        self.last_size = 0;
        self.splitter.reset();
        events.push(Event::NewFileStarted {
            path: self.path.clone(),
            lines: Vec::new(),
        });
    }

    /// Read everything past `last_size` into `NewLinesAdded` events.
    fn catch_up(&mut self, events: &mut Vec<Event>) {
        loop {
            let (lines, swapped) = self.read_available();
            if !lines.is_empty() {
                events.push(Event::NewLinesAdded {
                    path: self.path.clone(),
                    lines,
                });
            }
            match swapped {
                Some(new_id) => self.rotate(new_id, events),
                None => break,
            }
        }
    }

    /// Read from `last_size` to the current end of the file.
    ///
    /// Stops early and returns the new identity if the file opened for
    /// reading is not the one being followed. Read errors are logged and
    /// retried on the next change.
    fn read_available(&mut self) -> (Vec<String>, Option<FileId>) {
        let mut lines = Vec::new();
        loop {
            let chunk = match self.fs.read_range(&self.path, self.last_size, self.read_chunk) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => {
                    warn!(client_id = self.client_id, path = ?self.path, error = %err, "read failed");
                    break;
                }
            };

            if Some(chunk.id) != self.identity {
                return (lines, Some(chunk.id));
            }

            let read = chunk.bytes.len() as u64;
            if read == 0 {
                break;
            }
            self.last_size += read;
            lines.extend(self.splitter.feed(&chunk.bytes));
            if read < self.read_chunk {
                break;
            }
        }
        (lines, None)
    }

    fn stat_file(&self) -> Option<FileId> {
        self.stat_meta().map(|meta| meta.id)
    }

    fn stat_meta(&self) -> Option<crate::fs::FileMeta> {
        match self.fs.metadata(&self.path) {
            Ok(Some(meta)) if meta.kind == EntryKind::File => Some(meta),
            Ok(_) => None,
            Err(err) => {
                warn!(client_id = self.client_id, path = ?self.path, error = %err, "stat failed");
                None
            }
        }
    }
}

/// Drive a [`FileTail`] until it is cancelled or its observer gives up.
///
/// Filesystem work runs on the blocking pool so a slow disk never stalls the
/// observer streams of other units.
pub async fn run_file_tail(
    mut tail: FileTail,
    mode: StartMode,
    mut subscription: Subscription,
    mut cancel: oneshot::Receiver<()>,
    sink: EventSink,
) -> UnitExit {
    let started = tokio::task::spawn_blocking(move || {
        let events = tail.start(mode);
        (tail, events)
    })
    .await;
    let (returned, events) = match started {
        Ok(pair) => pair,
        Err(err) => return UnitExit::ObserverFailed(format!("start task failed: {err}")),
    };
    tail = returned;
    if !sink.emit(events).await {
        return UnitExit::DispatcherClosed;
    }

    let exit = loop {
        tokio::select! {
            biased;

            _ = &mut cancel => break UnitExit::Cancelled,

            change = subscription.next() => {
                let change = match change {
                    None => break UnitExit::ObserverClosed,
                    Some(PathChange::Failed { reason }) => break UnitExit::ObserverFailed(reason),
                    Some(change) => change,
                };

                let handled = tokio::task::spawn_blocking(move || {
                    let events = tail.on_change(&change);
                    (tail, events)
                })
                .await;
                let (returned, events) = match handled {
                    Ok(pair) => pair,
                    Err(err) => break UnitExit::ObserverFailed(format!("change task failed: {err}")),
                };
                tail = returned;

                if !sink.emit(events).await {
                    break UnitExit::DispatcherClosed;
                }
            }
        }
    };

    debug!(client_id = sink.client_id(), path = ?subscription.path(), ?exit, "file tail finished");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn tail_over(fs: &MockFileSystem, path: &str) -> FileTail {
        FileTail::new(7, path, Arc::new(fs.clone()), 1024)
    }

    fn started(lines: &[&str]) -> Event {
        Event::NewFileStarted {
            path: PathBuf::from("/log/app.log"),
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn added(lines: &[&str]) -> Event {
        Event::NewLinesAdded {
            path: PathBuf::from("/log/app.log"),
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn backfill_then_growth_with_partial_line() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "a\nb\n");
        let mut tail = tail_over(&fs, "/log/app.log");

        assert_eq!(tail.start(StartMode::Backfill), vec![started(&["a", "b"])]);
        assert_eq!(tail.state(), TailState::Active);
        assert_eq!(tail.last_size(), 4);

        fs.append("/log/app.log", "c");
        assert!(tail.on_change(&PathChange::Grew { len: 5 }).is_empty());

        fs.append("/log/app.log", "d\n");
        assert_eq!(tail.on_change(&PathChange::Grew { len: 7 }), vec![added(&["cd"])]);
        assert_eq!(tail.last_size(), 7);
    }

    #[test]
    fn backfill_keeps_trailing_fragment_for_later() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "x\npart");
        let mut tail = tail_over(&fs, "/log/app.log");

        assert_eq!(tail.start(StartMode::Backfill), vec![started(&["x"])]);
        fs.append("/log/app.log", "ial\n");
        assert_eq!(tail.on_change(&PathChange::Grew { len: 11 }), vec![added(&["partial"])]);
    }

    #[test]
    fn fresh_start_announces_empty_then_reads_from_zero() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "one\ntwo\n");
        let mut tail = tail_over(&fs, "/log/app.log");

        assert_eq!(
            tail.start(StartMode::Fresh),
            vec![started(&[]), added(&["one", "two"])]
        );
    }

    #[test]
    fn truncation_is_a_rotation() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "old line\n");
        let mut tail = tail_over(&fs, "/log/app.log");
        tail.start(StartMode::Backfill);

        fs.truncate("/log/app.log", 0);
        fs.append("/log/app.log", "new\n");
        assert_eq!(
            tail.on_change(&PathChange::Replaced),
            vec![started(&[]), added(&["new"])]
        );
        assert_eq!(tail.last_size(), 4);
    }

    #[test]
    fn truncate_and_longer_rewrite_is_a_rotation() {
        let fs = MockFileSystem::new();
        let id = fs.add_file("/log/app.log", "ab\n");
        let mut tail = tail_over(&fs, "/log/app.log");
        assert_eq!(tail.start(StartMode::Backfill), vec![started(&["ab"])]);

        // Same inode, and by now longer than what was consumed.
        fs.truncate("/log/app.log", 0);
        fs.append("/log/app.log", "new-one\nnew-two\n");
        assert_eq!(
            tail.on_change(&PathChange::Replaced),
            vec![started(&[]), added(&["new-one", "new-two"])]
        );
        assert_eq!(tail.identity(), Some(id));
        assert_eq!(tail.last_size(), 16);
    }

    #[test]
    fn replacement_reported_while_missing_waits_for_the_file() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "a\n");
        let mut tail = tail_over(&fs, "/log/app.log");
        tail.start(StartMode::Backfill);

        fs.remove("/log/app.log");
        assert!(tail.on_change(&PathChange::Replaced).is_empty());

        fs.add_file("/log/app.log", "b\n");
        assert_eq!(
            tail.on_change(&PathChange::Created { path: "/log/app.log".into() }),
            vec![started(&[]), added(&["b"])]
        );
    }

    #[test]
    fn replacement_under_same_name_is_a_rotation() {
        let fs = MockFileSystem::new();
        let first = fs.add_file("/log/app.log", "gen1\n");
        let mut tail = tail_over(&fs, "/log/app.log");
        tail.start(StartMode::Backfill);
        assert_eq!(tail.identity(), Some(first));

        // Longer than before, so only the identity reveals the rotation.
        let second = fs.replace("/log/app.log", "generation two\n");
        assert_eq!(
            tail.on_change(&PathChange::Grew { len: 15 }),
            vec![started(&[]), added(&["generation two"])]
        );
        assert_eq!(tail.identity(), Some(second));
    }

    #[test]
    fn removal_waits_and_recreation_rotates() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "before\n");
        let mut tail = tail_over(&fs, "/log/app.log");
        tail.start(StartMode::Backfill);

        fs.remove("/log/app.log");
        assert!(tail.on_change(&PathChange::Removed).is_empty());
        assert!(tail.on_change(&PathChange::Rescan).is_empty());
        assert_eq!(tail.state(), TailState::Active);

        fs.add_file("/log/app.log", "after\n");
        assert_eq!(
            tail.on_change(&PathChange::Replaced),
            vec![started(&[]), added(&["after"])]
        );
    }

    #[test]
    fn stale_shrink_report_is_confirmed_before_rotating() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "abc\n");
        let mut tail = tail_over(&fs, "/log/app.log");
        tail.start(StartMode::Backfill);

        fs.append("/log/app.log", "def\n");
        // The observer saw a smaller size than we have, but the file grew.
        assert_eq!(tail.on_change(&PathChange::Grew { len: 2 }), vec![added(&["def"])]);
    }

    #[test]
    fn duplicate_events_deliver_nothing_twice() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "");
        let mut tail = tail_over(&fs, "/log/app.log");
        assert_eq!(tail.start(StartMode::Backfill), vec![started(&[])]);

        fs.append("/log/app.log", "l\n");
        assert_eq!(tail.on_change(&PathChange::Grew { len: 2 }), vec![added(&["l"])]);
        assert!(tail.on_change(&PathChange::Grew { len: 2 }).is_empty());
        assert!(tail.on_change(&PathChange::Rescan).is_empty());
    }

    #[test]
    fn large_appends_are_read_in_chunks() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "");
        let mut tail = FileTail::new(1, "/log/app.log", Arc::new(fs.clone()), 3);
        tail.start(StartMode::Backfill);

        fs.append("/log/app.log", "alpha\nbeta\ngamma\n");
        assert_eq!(
            tail.on_change(&PathChange::Grew { len: 17 }),
            vec![added(&["alpha", "beta", "gamma"])]
        );
        assert_eq!(tail.last_size(), 17);
    }

    #[test]
    fn stopped_tail_ignores_changes() {
        let fs = MockFileSystem::new();
        fs.add_file("/log/app.log", "a\n");
        let mut tail = tail_over(&fs, "/log/app.log");
        tail.start(StartMode::Backfill);
        tail.stop();

        fs.append("/log/app.log", "b\n");
        assert!(tail.on_change(&PathChange::Grew { len: 4 }).is_empty());
        assert_eq!(tail.state(), TailState::Stopped);
    }

    #[test]
    fn missing_file_at_start_is_announced_when_it_appears() {
        let fs = MockFileSystem::new();
        fs.add_dir("/log");
        let mut tail = tail_over(&fs, "/log/app.log");
        assert!(tail.start(StartMode::Backfill).is_empty());

        fs.add_file("/log/app.log", "hi\n");
        assert_eq!(
            tail.on_change(&PathChange::Replaced),
            vec![started(&[]), added(&["hi"])]
        );
    }
}

//! Durable storage behind the journal.

pub mod fs;
pub mod mem;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use keel_state::{Deployment, JournalEntry, JournalSeq, VersionedDeployment};

use crate::error::{JournalError, PersistenceError, SequencingError};
use crate::replay::JournalReplayer;

pub use fs::{FsPersister, PersistedJournal};
pub use mem::MemPersister;

/// Storage the journal writes through. Implemented by deployment backends.
///
/// `append` must leave entries on stable storage in the order it was called and must
/// not return before the entry is durable.
pub trait JournalPersister: Send + Sync {
    /// Persists a new base checkpoint. Legal at most once, and only before any append.
    fn rebase(&self, base: &Deployment) -> Result<(), JournalError>;

    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError>;
}

/// Destination for fully materialized snapshots.
pub trait SnapshotPersister: Send + Sync {
    fn save(&self, snapshot: &Deployment) -> Result<(), JournalError>;
}

/// Writes each snapshot as a versioned JSON document, replacing the file atomically.
#[derive(Debug, Clone)]
pub struct FileSnapshotPersister {
    path: PathBuf,
}

impl FileSnapshotPersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last saved snapshot, if any.
    pub fn load(&self) -> Result<Option<Deployment>, JournalError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)
            .map_err(|e| PersistenceError::io(format!("reading {}", self.path.display()), e))?;
        let deployment = VersionedDeployment::from_json(&bytes)
            .map_err(|e| PersistenceError::Corrupt(format!("{}: {e}", self.path.display())))?;
        Ok(Some(deployment))
    }
}

impl SnapshotPersister for FileSnapshotPersister {
    fn save(&self, snapshot: &Deployment) -> Result<(), JournalError> {
        let bytes = VersionedDeployment::new(snapshot.clone())
            .to_json_pretty()
            .map_err(|e| PersistenceError::Encode(e.to_string()))?;
        write_atomic(&self.path, &bytes)
    }
}

/// Writes `bytes` to a temp file beside `path`, fsyncs it, and renames it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), JournalError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let context = || format!("writing {}", path.display());
    std::fs::create_dir_all(dir).map_err(|e| PersistenceError::io(context(), e))?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| PersistenceError::io(context(), e))?;
    tmp.write_all(bytes)
        .map_err(|e| PersistenceError::io(context(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PersistenceError::io(context(), e))?;
    tmp.persist(path)
        .map_err(|e| PersistenceError::io(context(), e.error))?;
    // The rename is only durable once the directory entry is.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

struct BridgeState {
    base: Deployment,
    replayer: JournalReplayer,
    /// Entries that arrived ahead of a gap, held until the gap fills.
    held: BTreeMap<JournalSeq, JournalEntry>,
    /// Highest sequence number covered by a saved snapshot.
    saved: JournalSeq,
    /// First fold or save failure; the stream cannot advance past it.
    failed: Option<JournalError>,
    rebased: bool,
    appended: bool,
}

impl BridgeState {
    /// Folds every contiguous held entry and saves the result.
    fn drain<S: SnapshotPersister>(&mut self, snapshots: &S) -> Result<(), JournalError> {
        while let Some(next) = self.held.remove(&(self.replayer.latest() + 1)) {
            self.replayer.replay(next)?;
        }
        let snapshot = self.replayer.finish(&self.base)?;
        snapshots.save(&snapshot)?;
        self.saved = self.replayer.latest();
        Ok(())
    }
}

/// Adapts a snapshot-oriented backend to the journal: every append is folded into an
/// incremental replay and the resulting snapshot is saved.
///
/// Concurrent journal writers may hand entries over out of sequence order. An entry
/// that arrives ahead of a gap blocks its caller until the gap fills and a snapshot
/// including it has been saved, so `append` never returns before the entry is durable.
/// The journal hands every sequence number it assigns to its persister, so gaps are
/// always filled eventually.
pub struct SnapshotJournalPersister<S> {
    state: Mutex<BridgeState>,
    drained: Condvar,
    snapshots: S,
}

impl<S: SnapshotPersister> SnapshotJournalPersister<S> {
    pub fn new(base: Deployment, snapshots: S) -> Self {
        Self {
            state: Mutex::new(BridgeState {
                base,
                replayer: JournalReplayer::new(),
                held: BTreeMap::new(),
                saved: 0,
                failed: None,
                rebased: false,
                appended: false,
            }),
            drained: Condvar::new(),
            snapshots,
        }
    }

    pub fn snapshots(&self) -> &S {
        &self.snapshots
    }

    /// Entries received but not yet applied because an earlier one is missing.
    pub fn held_back(&self) -> usize {
        self.lock_state().held.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: SnapshotPersister> JournalPersister for SnapshotJournalPersister<S> {
    fn rebase(&self, base: &Deployment) -> Result<(), JournalError> {
        let mut state = self.lock_state();
        if state.appended {
            return Err(SequencingError::PersisterRebaseAfterAppend.into());
        }
        if state.rebased {
            return Err(SequencingError::DoubleRebase.into());
        }
        self.snapshots.save(base)?;
        state.base = base.clone();
        state.rebased = true;
        Ok(())
    }

    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let seq = entry.sequence_number;
        let mut state = self.lock_state();
        state.appended = true;
        if let Some(err) = &state.failed {
            return Err(err.clone());
        }
        if seq <= state.replayer.latest() || state.held.contains_key(&seq) {
            return Err(SequencingError::OutOfOrder {
                seq,
                latest: state.replayer.latest(),
            }
            .into());
        }
        state.held.insert(seq, entry.clone());

        if seq == state.replayer.latest() + 1 {
            let result = state.drain(&self.snapshots);
            if let Err(err) = &result {
                state.failed = Some(err.clone());
            }
            self.drained.notify_all();
            return result;
        }

        log::debug!(
            "holding journal entry {seq} until entry {} arrives",
            state.replayer.latest() + 1
        );
        loop {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            if state.saved >= seq {
                return Ok(());
            }
            if let Some(err) = &state.failed {
                return Err(err.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use keel_state::{EntryKind, OpType, SerializedResource};
    use tempfile::TempDir;

    fn created(seq: JournalSeq, begin: JournalSeq, name: &str) -> JournalEntry {
        let mut res = SerializedResource::new(
            format!("urn:pulumi:dev::proj::pkg:m:R::{name}").as_str(),
            "pkg:m:R",
            true,
        );
        res.id = name.into();
        JournalEntry::new(EntryKind::Success)
            .with_seq(seq)
            .with_op(OpType::Create)
            .with_new(begin)
            .with_state(res)
    }

    fn begun(seq: JournalSeq) -> JournalEntry {
        JournalEntry::new(EntryKind::Begin)
            .with_seq(seq)
            .with_op(OpType::Create)
    }

    #[test]
    fn snapshot_file_tracks_appends() {
        let tmp = TempDir::new().unwrap();
        let file = FileSnapshotPersister::new(tmp.path().join("stack.json"));
        let persister = SnapshotJournalPersister::new(Deployment::empty(), file.clone());

        persister.append(&begun(1)).unwrap();
        persister.append(&created(2, 1, "a")).unwrap();

        let saved = file.load().unwrap().unwrap();
        assert_eq!(saved.resources.len(), 1);
        assert_eq!(saved.resources[0].id.as_str(), "a");
    }

    #[test]
    fn early_append_blocks_until_durable() {
        let tmp = TempDir::new().unwrap();
        let file = FileSnapshotPersister::new(tmp.path().join("stack.json"));
        let persister = SnapshotJournalPersister::new(Deployment::empty(), file.clone());
        let (done_tx, done_rx) = mpsc::channel();

        std::thread::scope(|scope| {
            let early = &persister;
            scope.spawn(move || {
                let result = early.append(&begun(2)).and_then(|()| early.append(&created(3, 2, "b")));
                done_tx.send(result.is_ok()).unwrap();
            });

            // Entry 2 cannot be saved before entry 1 exists.
            assert_eq!(
                done_rx.recv_timeout(Duration::from_millis(200)),
                Err(mpsc::RecvTimeoutError::Timeout)
            );
            assert!(file.load().unwrap().is_none());

            persister.append(&begun(1)).unwrap();
            assert!(done_rx.recv().unwrap());
        });

        assert_eq!(persister.held_back(), 0);
        let saved = file.load().unwrap().unwrap();
        assert_eq!(saved.resources.len(), 1);
        assert_eq!(saved.resources[0].id.as_str(), "b");
        assert!(saved.pending_operations.is_empty());
    }

    #[test]
    fn failed_fold_is_reported_to_waiting_appends() {
        let tmp = TempDir::new().unwrap();
        let file = FileSnapshotPersister::new(tmp.path().join("stack.json"));
        let persister = SnapshotJournalPersister::new(Deployment::empty(), file.clone());

        std::thread::scope(|scope| {
            let early = &persister;
            let waiting = scope.spawn(move || early.append(&begun(2)));
            while persister.held_back() == 0 {
                std::thread::yield_now();
            }

            // Outputs for a resource nobody created cannot be folded.
            let bad = JournalEntry::new(EntryKind::Outputs).with_seq(1).with_new(7);
            let err = persister.append(&bad).unwrap_err();
            assert!(matches!(err, JournalError::Lookup(_)));
            assert!(matches!(
                waiting.join().unwrap(),
                Err(JournalError::Lookup(_))
            ));
        });

        assert!(file.load().unwrap().is_none());
        assert!(persister.append(&begun(3)).is_err());
    }

    #[test]
    fn rebase_is_refused_after_append() {
        let tmp = TempDir::new().unwrap();
        let file = FileSnapshotPersister::new(tmp.path().join("stack.json"));
        let persister = SnapshotJournalPersister::new(Deployment::empty(), file);
        persister.append(&begun(1)).unwrap();
        let err = persister.rebase(&Deployment::empty()).unwrap_err();
        assert!(matches!(
            err,
            JournalError::Sequencing(SequencingError::PersisterRebaseAfterAppend)
        ));
    }
}

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use keel_state::{Deployment, JournalEntry, VersionedDeployment, to_canonical_cbor};

use super::{JournalPersister, write_atomic};
use crate::config::JournalConfig;
use crate::error::{JournalError, PersistenceError, SequencingError};

pub const BASE_FILE: &str = "base.json";
pub const JOURNAL_FILE: &str = "journal.log";

/// Contents of a journal directory.
#[derive(Debug, Clone, Default)]
pub struct PersistedJournal {
    /// Rebase checkpoint, when the journal was rebased.
    pub base: Option<Deployment>,
    /// Entries in the order they reached storage.
    pub entries: Vec<JournalEntry>,
}

struct LogFile {
    file: File,
    appended: bool,
}

/// Directory-backed persister: a `base.json` checkpoint plus `journal.log`, a stream of
/// length-prefixed canonical CBOR records.
pub struct FsPersister {
    dir: PathBuf,
    sync_writes: bool,
    log: Mutex<LogFile>,
}

impl FsPersister {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, JournalError> {
        Self::open_with(dir, true)
    }

    pub fn from_config(config: &JournalConfig) -> Result<Self, JournalError> {
        Self::open_with(&config.dir, config.sync_writes)
    }

    /// Opens (creating if needed) a journal directory. With `sync_writes` off, appends
    /// reach the OS but are not fsynced.
    pub fn open_with(dir: impl AsRef<Path>, sync_writes: bool) -> Result<Self, JournalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| PersistenceError::io(format!("creating {}", dir.display()), e))?;
        let path = dir.join(JOURNAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(|e| PersistenceError::io(format!("opening {}", path.display()), e))?;
        let appended = file
            .metadata()
            .map_err(|e| PersistenceError::io(format!("inspecting {}", path.display()), e))?
            .len()
            > 0;
        Ok(Self {
            dir,
            sync_writes,
            log: Mutex::new(LogFile { file, appended }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads back everything persisted so far.
    pub fn load(&self) -> Result<PersistedJournal, JournalError> {
        load_dir(&self.dir)
    }
}

impl JournalPersister for FsPersister {
    fn rebase(&self, base: &Deployment) -> Result<(), JournalError> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if log.appended {
            return Err(SequencingError::PersisterRebaseAfterAppend.into());
        }
        let path = self.dir.join(BASE_FILE);
        if path.exists() {
            return Err(SequencingError::DoubleRebase.into());
        }
        let bytes = VersionedDeployment::new(base.clone())
            .to_json_pretty()
            .map_err(|e| PersistenceError::Encode(e.to_string()))?;
        write_atomic(&path, &bytes)?;
        log::debug!(
            "wrote rebase checkpoint with {} resources to {}",
            base.resources.len(),
            path.display()
        );
        Ok(())
    }

    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let bytes = to_canonical_cbor(entry).map_err(|e| PersistenceError::Encode(e.to_string()))?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| PersistenceError::Encode("entry larger than 4GiB".into()))?;

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let context = || format!("appending entry {}", entry.sequence_number);
        // One buffer, one write: a crash leaves at most a truncated tail record.
        let mut record = Vec::with_capacity(4 + bytes.len());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&bytes);
        log.file
            .write_all(&record)
            .map_err(|e| PersistenceError::io(context(), e))?;
        if self.sync_writes {
            log.file
                .sync_all()
                .map_err(|e| PersistenceError::io(context(), e))?;
        }
        log.appended = true;
        Ok(())
    }
}

/// Reads a journal directory without opening it for writing.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<PersistedJournal, JournalError> {
    let dir = dir.as_ref();
    let base_path = dir.join(BASE_FILE);
    let base = if base_path.exists() {
        let bytes = fs::read(&base_path)
            .map_err(|e| PersistenceError::io(format!("reading {}", base_path.display()), e))?;
        Some(
            VersionedDeployment::from_json(&bytes).map_err(|e| {
                PersistenceError::Corrupt(format!("{}: {e}", base_path.display()))
            })?,
        )
    } else {
        None
    };

    let log_path = dir.join(JOURNAL_FILE);
    let entries = if log_path.exists() {
        read_all_records(&log_path)?
    } else {
        Vec::new()
    };
    Ok(PersistedJournal { base, entries })
}

fn read_all_records(path: &Path) -> Result<Vec<JournalEntry>, JournalError> {
    let context = || format!("reading {}", path.display());
    let mut file = File::open(path).map_err(|e| PersistenceError::io(context(), e))?;
    let mut entries = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        let read = read_up_to(&mut file, &mut len_buf).map_err(|e| PersistenceError::io(context(), e))?;
        if read == 0 {
            break;
        }
        if read < len_buf.len() {
            return Err(PersistenceError::Corrupt(format!(
                "truncated length header after entry {} (read {read} bytes)",
                entries.len()
            ))
            .into());
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        if let Err(err) = file.read_exact(&mut buf) {
            if err.kind() == ErrorKind::UnexpectedEof {
                return Err(PersistenceError::Corrupt(format!(
                    "truncated payload after entry {}",
                    entries.len()
                ))
                .into());
            }
            return Err(PersistenceError::io(context(), err).into());
        }
        let entry: JournalEntry = serde_cbor::from_slice(&buf).map_err(|e| {
            PersistenceError::Corrupt(format!("record {}: {e}", entries.len() + 1))
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Like `read_exact`, but reports how much was read when the file ends early.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_state::{EntryKind, OpType, SerializedResource};
    use tempfile::TempDir;

    fn sample(seq: i64) -> JournalEntry {
        let mut res = SerializedResource::new("urn:pulumi:d::p::pkg:m:R::a", "pkg:m:R", true);
        res.outputs.insert("n".into(), serde_json::json!(1.5));
        res.inputs.insert("tags".into(), serde_json::json!({ "env": "dev" }));
        JournalEntry::new(EntryKind::Success)
            .with_seq(seq)
            .with_op(OpType::Update)
            .with_old(1)
            .with_new(seq - 1)
            .with_state(res)
    }

    #[test]
    fn writes_and_recovers_entries() {
        let tmp = TempDir::new().unwrap();
        {
            let persister = FsPersister::open(tmp.path()).unwrap();
            persister.rebase(&Deployment::empty()).unwrap();
            persister.append(&sample(2)).unwrap();
            persister.append(&sample(3)).unwrap();
        }

        let loaded = FsPersister::open(tmp.path()).unwrap().load().unwrap();
        assert!(loaded.base.is_some());
        assert_eq!(loaded.entries, vec![sample(2), sample(3)]);
    }

    #[test]
    fn reopened_journal_refuses_rebase() {
        let tmp = TempDir::new().unwrap();
        FsPersister::open(tmp.path())
            .unwrap()
            .append(&sample(2))
            .unwrap();
        let again = FsPersister::open(tmp.path()).unwrap();
        assert!(matches!(
            again.rebase(&Deployment::empty()),
            Err(JournalError::Sequencing(
                SequencingError::PersisterRebaseAfterAppend
            ))
        ));
    }

    #[test]
    fn second_rebase_fails() {
        let tmp = TempDir::new().unwrap();
        let persister = FsPersister::open_with(tmp.path(), false).unwrap();
        persister.rebase(&Deployment::empty()).unwrap();
        assert!(matches!(
            persister.rebase(&Deployment::empty()),
            Err(JournalError::Sequencing(SequencingError::DoubleRebase))
        ));
    }

    #[test]
    fn detects_truncated_entry() {
        let tmp = TempDir::new().unwrap();
        {
            let persister = FsPersister::open(tmp.path()).unwrap();
            persister.append(&sample(2)).unwrap();
        }

        let log_path = tmp.path().join(JOURNAL_FILE);
        let len = fs::metadata(&log_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.set_len(len - 1).unwrap();

        let err = load_dir(tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            JournalError::Persistence(PersistenceError::Corrupt(_))
        ));
    }

    #[test]
    fn detects_truncated_header() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(JOURNAL_FILE), [7u8, 0]).unwrap();
        let err = load_dir(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("truncated length header"));
    }

    #[test]
    fn empty_directory_loads_nothing() {
        let tmp = TempDir::new().unwrap();
        let loaded = load_dir(tmp.path()).unwrap();
        assert!(loaded.base.is_none());
        assert!(loaded.entries.is_empty());
    }
}

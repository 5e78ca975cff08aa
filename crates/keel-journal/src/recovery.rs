//! Crash recovery: rebuild the latest snapshot from what a persister left on disk.

use std::path::Path;

use chrono::{DateTime, Utc};
use keel_state::{Deployment, JournalEntry};

use crate::error::JournalError;
use crate::persist::fs::load_dir;
use crate::replay::JournalReplayer;

/// Folds a persisted entry stream over `base` and returns the verified snapshot.
///
/// Concurrent writers may have reached storage slightly out of sequence order, so the
/// stream is ordered by sequence number first. Gaps and repeats still fail.
pub fn replay_entries(
    base: &Deployment,
    entries: Vec<JournalEntry>,
) -> Result<Deployment, JournalError> {
    replay_entries_at(base, entries, Utc::now())
}

/// [`replay_entries`] with a fixed manifest timestamp, for reproducible output.
pub fn replay_entries_at(
    base: &Deployment,
    mut entries: Vec<JournalEntry>,
    time: DateTime<Utc>,
) -> Result<Deployment, JournalError> {
    entries.sort_by_key(|entry| entry.sequence_number);
    let mut replayer = JournalReplayer::new();
    for entry in entries {
        replayer.replay(entry)?;
    }
    log::debug!(
        "replayed {} journal entries over {} base resources",
        replayer.latest(),
        base.resources.len()
    );
    replayer.finish_at(base, time)
}

/// Recovers the snapshot held in a journal directory.
///
/// The directory's own rebase checkpoint is the base when present; otherwise
/// `fallback` is, and failing that an empty deployment.
pub fn recover_dir(
    dir: impl AsRef<Path>,
    fallback: Option<Deployment>,
) -> Result<Deployment, JournalError> {
    let persisted = load_dir(dir)?;
    let base = persisted
        .base
        .or(fallback)
        .unwrap_or_else(Deployment::empty);
    replay_entries(&base, persisted.entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SequencingError;
    use keel_state::EntryKind;

    #[test]
    fn storage_order_does_not_matter() {
        let entries = vec![
            JournalEntry::new(EntryKind::Begin).with_seq(2),
            JournalEntry::new(EntryKind::Begin).with_seq(1),
        ];
        assert!(replay_entries(&Deployment::empty(), entries).is_ok());
    }

    #[test]
    fn gaps_are_still_fatal() {
        let entries = vec![
            JournalEntry::new(EntryKind::Begin).with_seq(1),
            JournalEntry::new(EntryKind::Begin).with_seq(3),
        ];
        let err = replay_entries(&Deployment::empty(), entries).unwrap_err();
        assert!(matches!(
            err,
            JournalError::Sequencing(SequencingError::OutOfOrder { seq: 3, latest: 1 })
        ));
    }
}

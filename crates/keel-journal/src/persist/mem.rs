use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keel_state::{Deployment, JournalEntry};

use super::JournalPersister;
use crate::error::{JournalError, SequencingError};

#[derive(Debug, Default)]
struct Recorded {
    base: Option<Deployment>,
    entries: Vec<JournalEntry>,
}

/// In-memory persister for tests and dry runs. Clones share the same storage.
#[derive(Debug, Default, Clone)]
pub struct MemPersister {
    recorded: Arc<Mutex<Recorded>>,
}

impl MemPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebase checkpoint, if one was written.
    pub fn base(&self) -> Option<Deployment> {
        self.lock().base.clone()
    }

    /// Entries in append order.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JournalPersister for MemPersister {
    fn rebase(&self, base: &Deployment) -> Result<(), JournalError> {
        let mut recorded = self.lock();
        if !recorded.entries.is_empty() {
            return Err(SequencingError::PersisterRebaseAfterAppend.into());
        }
        if recorded.base.is_some() {
            return Err(SequencingError::DoubleRebase.into());
        }
        recorded.base = Some(base.clone());
        Ok(())
    }

    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        self.lock().entries.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_state::EntryKind;

    #[test]
    fn records_in_call_order_and_shares_storage() {
        let persister = MemPersister::new();
        let handle = persister.clone();
        for seq in [2, 1, 3] {
            persister
                .append(&JournalEntry::new(EntryKind::Begin).with_seq(seq))
                .unwrap();
        }
        let seqs: Vec<_> = handle.entries().iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![2, 1, 3]);
        assert!(matches!(
            handle.rebase(&Deployment::empty()),
            Err(JournalError::Sequencing(
                SequencingError::PersisterRebaseAfterAppend
            ))
        ));
    }

    #[test]
    fn rebase_only_once() {
        let persister = MemPersister::new();
        persister.rebase(&Deployment::empty()).unwrap();
        assert!(persister.base().is_some());
        assert!(matches!(
            persister.rebase(&Deployment::empty()),
            Err(JournalError::Sequencing(SequencingError::DoubleRebase))
        ));
    }
}

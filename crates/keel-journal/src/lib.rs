//! Deployment journal: records resource step lifecycles as a sequenced, durable entry
//! stream and rebuilds integrity-checked snapshots from it.

pub mod config;
pub mod error;
pub mod journal;
pub mod persist;
pub mod recovery;
pub mod replay;
pub mod step;

pub use config::JournalConfig;
pub use error::{JournalError, LookupError, PersistenceError, SequencingError};
pub use journal::{Journal, Mutation};
pub use persist::{
    FileSnapshotPersister, FsPersister, JournalPersister, MemPersister, PersistedJournal,
    SnapshotJournalPersister, SnapshotPersister,
};
pub use recovery::{recover_dir, replay_entries, replay_entries_at};
pub use replay::JournalReplayer;
pub use step::{Step, StepOp, StepRecord};

use std::sync::Arc;

use keel_state::{DeploymentError, IntegrityError, JournalSeq, Urn};
use thiserror::Error;

/// Caller broke the journal protocol. Fatal to the deployment, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencingError {
    #[error("rebase may only be called once")]
    DoubleRebase,
    #[error("rebase may only be called before snapshot mutations begin")]
    RebaseAfterMutation,
    #[error("cannot replay entry {seq} out of order (latest is {latest})")]
    OutOfOrder { seq: JournalSeq, latest: JournalSeq },
    #[error("secrets already recorded for this replay (entry {seq})")]
    DuplicateSecrets { seq: JournalSeq },
    #[error("persister cannot rebase after entries were appended")]
    PersisterRebaseAfterAppend,
}

/// An entry refers to state the journal never saw. Always an engine bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("missing ID for old resource {urn}")]
    MissingOldId { urn: Urn },
    #[error("missing old ID for entry {seq}")]
    MissingOldReference { seq: JournalSeq },
    #[error("outputs entry {seq} refers to unknown resource {new}")]
    UnknownOutputsTarget { seq: JournalSeq, new: i64 },
    #[error("entry {seq} carries no resource state")]
    MissingState { seq: JournalSeq },
}

#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("failed to encode journal record: {0}")]
    Encode(String),
    #[error("corrupt journal: {0}")]
    Corrupt(String),
    #[error("persister unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }
}

/// Errors cross the init gate and are handed to every late caller, hence `Clone`.
#[derive(Debug, Clone, Error)]
pub enum JournalError {
    #[error(transparent)]
    Sequencing(#[from] SequencingError),
    #[error("snapshot integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("{context}: {message}")]
    Serialization { context: String, message: String },
}

impl JournalError {
    pub fn serialization(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        JournalError::Serialization {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

impl From<DeploymentError> for JournalError {
    fn from(err: DeploymentError) -> Self {
        JournalError::serialization("serializing state", err)
    }
}

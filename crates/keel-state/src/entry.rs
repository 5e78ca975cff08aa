//! Wire types for journal entries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deployment::{OperationType, SerializedResource};
use crate::secrets::SecretsProviders;

/// Monotonic sequence number assigned to every journal entry; the first entry is 1.
pub type JournalSeq = i64;

/// `old` value of a `Same` step whose resource was never actually created.
pub const SKIPPED_CREATE_OLD: i64 = -1;

/// `old`/`new` value meaning "no reference".
pub const NO_REFERENCE: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Begin,
    Success,
    Failure,
    PendingDeletion,
    PendingReplacement,
    Outputs,
    Secrets,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryKind::Begin => "begin",
            EntryKind::Success => "success",
            EntryKind::Failure => "failure",
            EntryKind::PendingDeletion => "pending_deletion",
            EntryKind::PendingReplacement => "pending_replacement",
            EntryKind::Outputs => "outputs",
            EntryKind::Secrets => "secrets",
        };
        f.write_str(name)
    }
}

/// Resource operation a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpType {
    Same,
    Create,
    Update,
    Delete,
    Replace,
    CreateReplacement,
    DeleteReplaced,
    Read,
    ReadReplacement,
    Refresh,
    #[serde(rename = "discard")]
    ReadDiscard,
    DiscardReplaced,
    RemovePendingReplace,
    Import,
    ImportReplacement,
}

impl OpType {
    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Same => "same",
            OpType::Create => "create",
            OpType::Update => "update",
            OpType::Delete => "delete",
            OpType::Replace => "replace",
            OpType::CreateReplacement => "create-replacement",
            OpType::DeleteReplaced => "delete-replaced",
            OpType::Read => "read",
            OpType::ReadReplacement => "read-replacement",
            OpType::Refresh => "refresh",
            OpType::ReadDiscard => "discard",
            OpType::DiscardReplaced => "discard-replaced",
            OpType::RemovePendingReplace => "remove-pending-replace",
            OpType::Import => "import",
            OpType::ImportReplacement => "import-replacement",
        }
    }

    /// Whether a successful step of this kind contributes a resource to the new
    /// snapshot.
    pub fn materializes(self) -> bool {
        matches!(
            self,
            OpType::Same
                | OpType::Create
                | OpType::CreateReplacement
                | OpType::Update
                | OpType::Refresh
                | OpType::Read
                | OpType::ReadReplacement
                | OpType::Import
                | OpType::ImportReplacement
        )
    }

    /// How an operation left in flight is reported to the user. Operations with no
    /// user-visible effect in flight have no classification.
    pub fn pending_operation_type(self) -> Option<OperationType> {
        match self {
            OpType::Create | OpType::CreateReplacement => Some(OperationType::Creating),
            OpType::Delete
            | OpType::DeleteReplaced
            | OpType::ReadDiscard
            | OpType::DiscardReplaced => Some(OperationType::Deleting),
            OpType::Read | OpType::ReadReplacement => Some(OperationType::Reading),
            OpType::Update => Some(OperationType::Updating),
            OpType::Import | OpType::ImportReplacement => Some(OperationType::Importing),
            OpType::Same
            | OpType::Replace
            | OpType::Refresh
            | OpType::RemovePendingReplace => None,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted journal record.
///
/// `old` is the 1-based index of the prior state in the base snapshot (0 when there is
/// none, [`SKIPPED_CREATE_OLD`] for skipped creates). `new` is the sequence number of
/// the `Begin` entry that introduced the new state, which correlates later `Success`,
/// `Failure`, and `Outputs` entries with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub sequence_number: JournalSeq,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<OpType>,
    #[serde(default)]
    pub old: i64,
    #[serde(default)]
    pub new: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SerializedResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<SecretsProviders>,
}

impl JournalEntry {
    /// Entry of the given kind with every other field empty; the journal assigns the
    /// sequence number when it appends.
    pub fn new(kind: EntryKind) -> Self {
        Self {
            sequence_number: 0,
            kind,
            op: None,
            old: NO_REFERENCE,
            new: NO_REFERENCE,
            state: None,
            secrets: None,
        }
    }

    pub fn with_op(mut self, op: OpType) -> Self {
        self.op = Some(op);
        self
    }

    pub fn with_old(mut self, old: i64) -> Self {
        self.old = old;
        self
    }

    pub fn with_new(mut self, new: i64) -> Self {
        self.new = new;
        self
    }

    pub fn with_state(mut self, state: SerializedResource) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_secrets(mut self, secrets: SecretsProviders) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_seq(mut self, seq: JournalSeq) -> Self {
        self.sequence_number = seq;
        self
    }
}

//! Rebuilds a deployment from a base checkpoint and the journal entries written after it.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use keel_state::entry::NO_REFERENCE;
use keel_state::{
    AliasMap, Deployment, ENGINE_VERSION, EntryKind, JournalEntry, JournalSeq, Manifest, OpType,
    OperationType, PendingOperation, SKIPPED_CREATE_OLD, SecretsProviders, SerializedResource,
    verify_integrity,
};

use crate::error::{JournalError, LookupError, SequencingError};

/// Single-threaded fold over a gap-free entry stream.
///
/// Every entry is applied completely or not at all: a rejected entry leaves the
/// replayer exactly as it was.
#[derive(Debug, Clone, Default)]
pub struct JournalReplayer {
    latest: JournalSeq,
    secrets: Option<SecretsProviders>,
    /// Begun but not yet finished steps, keyed by their `Begin` sequence number.
    pending: BTreeMap<JournalSeq, JournalEntry>,
    aliases: AliasMap,
    resources: Vec<SerializedResource>,
    /// `Begin` sequence number -> position in `resources`.
    news: HashMap<JournalSeq, usize>,
    /// Base indices superseded by this replay.
    done: HashSet<i64>,
    pending_deletion: HashSet<i64>,
    pending_replacement: HashSet<i64>,
}

impl JournalReplayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the last applied entry (0 before any).
    pub fn latest(&self) -> JournalSeq {
        self.latest
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn resources(&self) -> &[SerializedResource] {
        &self.resources
    }

    pub fn replay(&mut self, entry: JournalEntry) -> Result<(), JournalError> {
        let seq = entry.sequence_number;
        if seq != self.latest + 1 {
            return Err(SequencingError::OutOfOrder {
                seq,
                latest: self.latest,
            }
            .into());
        }

        match entry.kind {
            EntryKind::Begin => {
                self.pending.insert(seq, entry);
            }
            EntryKind::Failure => {
                self.pending.remove(&entry.new);
            }
            EntryKind::Success => self.replay_success(entry)?,
            EntryKind::PendingDeletion => {
                self.pending_deletion.insert(entry.old);
            }
            EntryKind::PendingReplacement => {
                self.pending_replacement.insert(entry.old);
            }
            EntryKind::Outputs => {
                let index = *self
                    .news
                    .get(&entry.new)
                    .ok_or(LookupError::UnknownOutputsTarget {
                        seq,
                        new: entry.new,
                    })?;
                let state = entry.state.ok_or(LookupError::MissingState { seq })?;
                self.resources[index].outputs = state.outputs;
            }
            EntryKind::Secrets => {
                if self.secrets.is_some() {
                    return Err(SequencingError::DuplicateSecrets { seq }.into());
                }
                self.secrets = entry.secrets;
            }
        }

        self.latest = seq;
        Ok(())
    }

    fn replay_success(&mut self, entry: JournalEntry) -> Result<(), JournalError> {
        let seq = entry.sequence_number;
        let old = entry.old;
        let Some(op) = entry.op else {
            self.pending.remove(&entry.new);
            return Ok(());
        };

        let replacing = self.pending_replacement.contains(&old);
        let append = op.materializes();
        let mark_done = match op {
            OpType::Same => old != SKIPPED_CREATE_OLD && old != NO_REFERENCE,
            OpType::Update | OpType::Refresh | OpType::ReadReplacement => true,
            OpType::Create | OpType::CreateReplacement => replacing,
            OpType::Delete
            | OpType::DeleteReplaced
            | OpType::ReadDiscard
            | OpType::DiscardReplaced => !replacing,
            OpType::Replace => false,
            OpType::Read | OpType::Import | OpType::ImportReplacement => false,
            OpType::RemovePendingReplace => true,
        };

        if mark_done && old == NO_REFERENCE {
            return Err(LookupError::MissingOldReference { seq }.into());
        }
        if append {
            let state = entry.state.ok_or(LookupError::MissingState { seq })?;
            self.append_new_resource(entry.new, state)?;
        }

        self.pending.remove(&entry.new);
        if mark_done {
            self.done.insert(old);
        }
        Ok(())
    }

    fn append_new_resource(
        &mut self,
        new: JournalSeq,
        mut res: SerializedResource,
    ) -> Result<(), JournalError> {
        self.aliases.normalize(&mut res)?;
        self.news.insert(new, self.resources.len());
        self.resources.push(res);
        Ok(())
    }

    /// Completes the replay against `base`, stamping the manifest with the current time.
    pub fn finish(&self, base: &Deployment) -> Result<Deployment, JournalError> {
        self.finish_at(base, Utc::now())
    }

    /// Completes the replay against `base` without consuming the replayer.
    ///
    /// Base resources the journal did not supersede are carried forward in their
    /// original order, still-open steps become pending operations, and the result is
    /// verified before it is returned.
    pub fn finish_at(
        &self,
        base: &Deployment,
        time: DateTime<Utc>,
    ) -> Result<Deployment, JournalError> {
        let mut aliases = self.aliases.clone();
        let mut resources = self.resources.clone();
        for (i, res) in base.resources.iter().enumerate() {
            let index = i as i64 + 1;
            if self.done.contains(&index) {
                continue;
            }
            let mut res = res.clone();
            if self.pending_deletion.contains(&index) {
                res.delete = true;
            }
            if self.pending_replacement.contains(&index) {
                res.pending_replacement = true;
            }
            aliases.normalize(&mut res)?;
            resources.push(res);
        }

        let mut pending_operations =
            Vec::with_capacity(self.pending.len() + base.pending_operations.len());
        for entry in self.pending.values() {
            let (Some(op), Some(state)) = (entry.op, &entry.state) else {
                continue;
            };
            if let Some(ty) = op.pending_operation_type() {
                pending_operations.push(PendingOperation {
                    resource: state.clone(),
                    ty,
                });
            }
        }
        // Interrupted creates need a human to resolve them; never drop them.
        pending_operations.extend(
            base.pending_operations
                .iter()
                .filter(|op| op.ty == OperationType::Creating)
                .cloned(),
        );

        if !self.pending.is_empty() {
            log::warn!(
                "journal replay finished with {} step(s) still in flight (latest entry {})",
                self.pending.len(),
                self.latest
            );
        }

        let deployment = Deployment {
            manifest: Manifest {
                time,
                magic: base.manifest.magic.clone(),
                version: ENGINE_VERSION.to_string(),
                plugins: base.manifest.plugins.clone(),
            },
            secrets_providers: self
                .secrets
                .clone()
                .or_else(|| base.secrets_providers.clone()),
            resources,
            pending_operations,
        };
        verify_integrity(Some(&deployment))?;
        Ok(deployment)
    }
}

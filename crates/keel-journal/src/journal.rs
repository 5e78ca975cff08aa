//! Write path: turns step lifecycle notifications into a sequenced entry stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

use dashmap::DashMap;
use keel_state::entry::NO_REFERENCE;
use keel_state::serialize::serialize_resource;
use keel_state::{
    Encrypter, EntryKind, JournalEntry, JournalSeq, SKIPPED_CREATE_OLD, SecretsProviders,
    SharedSecretsManager, Snapshot, StateHandle, UnconfiguredCrypter, serialize_deployment,
};

use crate::error::{JournalError, LookupError, PersistenceError, SequencingError};
use crate::persist::JournalPersister;
use crate::step::{Step, StepOp};

enum InitState {
    Uninitialized,
    Initializing,
    Done(Result<(), JournalError>),
}

struct Base {
    snapshot: Snapshot,
    rebased: bool,
}

/// Journal for one deployment.
///
/// Safe to share between the tasks executing steps: sequence numbers come from an
/// atomic counter and `Begin` correlation lives in a concurrent map. The first
/// append (or [`Journal::close`]) runs a one-time initialization that persists any
/// rebase and records the secrets provider; every caller observes its outcome.
pub struct Journal {
    init: Mutex<InitState>,
    init_done: Condvar,
    base: Mutex<Base>,
    /// Base state handle -> 1-based position in the base snapshot.
    olds: OnceLock<HashMap<StateHandle, i64>>,
    /// New state handle -> `Begin` sequence number of the step that materializes it.
    /// Outputs registrations resolve through this map.
    news: DashMap<StateHandle, JournalSeq>,
    /// Same, for steps that materialize nothing (deletes, `Replace`). Kept apart so
    /// they never shadow the step that produced a state.
    retirements: DashMap<StateHandle, JournalSeq>,
    seq: AtomicI64,
    secrets: Option<SharedSecretsManager>,
    enc: Arc<dyn Encrypter>,
    persister: Arc<dyn JournalPersister>,
}

impl Journal {
    /// Creates a journal over `base`. Without an explicit secrets manager the base
    /// snapshot's is used; without either, recording any secret fails.
    pub fn new(
        persister: Arc<dyn JournalPersister>,
        base: Snapshot,
        secrets: Option<SharedSecretsManager>,
    ) -> Result<Self, JournalError> {
        let secrets = secrets.or_else(|| base.secrets_manager.clone());
        let enc: Arc<dyn Encrypter> = match &secrets {
            Some(sm) => sm
                .encrypter()
                .map_err(|e| JournalError::serialization("getting encrypter for deployment", e))?,
            None => Arc::new(UnconfiguredCrypter),
        };
        Ok(Self {
            init: Mutex::new(InitState::Uninitialized),
            init_done: Condvar::new(),
            base: Mutex::new(Base {
                snapshot: base,
                rebased: false,
            }),
            olds: OnceLock::new(),
            news: DashMap::new(),
            retirements: DashMap::new(),
            seq: AtomicI64::new(0),
            secrets,
            enc,
            persister,
        })
    }

    /// Replaces the base that old states are resolved against. Allowed once, before
    /// anything has been appended.
    pub fn rebase(&self, base: Snapshot) -> Result<(), JournalError> {
        let init = self.lock_init();
        if !matches!(*init, InitState::Uninitialized) {
            return Err(SequencingError::RebaseAfterMutation.into());
        }
        let mut current = self.base.lock().unwrap_or_else(PoisonError::into_inner);
        if current.rebased {
            return Err(SequencingError::DoubleRebase.into());
        }
        log::debug!("journal rebased onto {} resources", base.resources.len());
        current.snapshot = base;
        current.rebased = true;
        Ok(())
    }

    /// Records that `step` started. The returned token reports its outcome.
    pub fn begin_mutation(&self, step: &dyn Step) -> Result<Mutation<'_>, JournalError> {
        self.append_step(EntryKind::Begin, step)?;
        Ok(Mutation { journal: self })
    }

    pub fn end(&self, step: &dyn Step, success: bool) -> Result<(), JournalError> {
        let kind = if success {
            EntryKind::Success
        } else {
            EntryKind::Failure
        };
        self.append_step(kind, step)
    }

    /// Records outputs registered for a resource produced earlier in this deployment.
    pub fn register_resource_outputs(&self, step: &dyn Step) -> Result<(), JournalError> {
        self.append_step(EntryKind::Outputs, step)
    }

    /// Makes sure the base and secrets context is durable even if no step ran.
    pub fn close(&self) -> Result<(), JournalError> {
        self.ensure_init()
    }

    /// Number of entries sequenced so far.
    pub fn last_seq(&self) -> JournalSeq {
        self.seq.load(Ordering::SeqCst)
    }

    fn append(&self, entry: JournalEntry) -> Result<JournalSeq, JournalError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = entry.with_seq(seq);
        self.persister.append(&entry)?;
        match entry.op {
            Some(op) => log::debug!("journal entry {seq}: {} {op}", entry.kind),
            None => log::debug!("journal entry {seq}: {}", entry.kind),
        }
        Ok(seq)
    }

    fn append_step(&self, kind: EntryKind, step: &dyn Step) -> Result<(), JournalError> {
        // Refresh results reach the base through a rebase instead.
        if step.op() == StepOp::Refresh {
            return Ok(());
        }
        self.ensure_init()?;

        let state = step
            .res()
            .map(|res| serialize_resource(res, self.enc.as_ref(), false))
            .transpose()?;
        let old = self.old_reference(kind, step)?;
        let op = matches!(
            kind,
            EntryKind::Begin | EntryKind::Success | EntryKind::Failure
        )
        .then(|| step.op());
        let handle = step.correlation_handle();
        let correlation = if kind == EntryKind::Outputs || step.op().materializes() {
            &self.news
        } else {
            &self.retirements
        };
        let new = handle
            .and_then(|h| correlation.get(&h).map(|seq| *seq))
            .unwrap_or(NO_REFERENCE);

        let mut entry = JournalEntry::new(kind).with_old(old).with_new(new);
        entry.op = op;
        entry.state = state;
        let seq = self.append(entry)?;

        if kind == EntryKind::Begin {
            if let Some(handle) = handle {
                correlation.insert(handle, seq);
            }
        }
        Ok(())
    }

    /// Resolves the base index of the step's old state. A successful step whose old
    /// state is flagged for deletion or replacement first records those flags.
    fn old_reference(&self, kind: EntryKind, step: &dyn Step) -> Result<i64, JournalError> {
        match step.op() {
            StepOp::Import | StepOp::ImportReplacement | StepOp::Read => return Ok(NO_REFERENCE),
            StepOp::Same if step.is_skipped_create() => return Ok(SKIPPED_CREATE_OLD),
            _ => {}
        }

        let Some(old) = step.old() else {
            return Ok(NO_REFERENCE);
        };
        let index = self
            .olds
            .get()
            .and_then(|olds| olds.get(&old.handle()))
            .copied()
            .ok_or_else(|| LookupError::MissingOldId {
                urn: step.urn().clone(),
            })?;

        if kind == EntryKind::Success {
            if old.delete {
                self.append(JournalEntry::new(EntryKind::PendingDeletion).with_old(index))?;
            }
            if old.pending_replacement {
                self.append(JournalEntry::new(EntryKind::PendingReplacement).with_old(index))?;
            }
        }
        Ok(index)
    }

    fn lock_init(&self) -> MutexGuard<'_, InitState> {
        self.init.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs initialization exactly once. Concurrent callers wait for the first one;
    /// later callers get the cached outcome.
    fn ensure_init(&self) -> Result<(), JournalError> {
        let mut init = self.lock_init();
        loop {
            match &*init {
                InitState::Done(result) => return result.clone(),
                InitState::Uninitialized => break,
                InitState::Initializing => {}
            }
            init = self
                .init_done
                .wait(init)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *init = InitState::Initializing;
        drop(init);

        let mut gate = InitGate {
            journal: self,
            result: None,
        };
        let result = self.initialize();
        gate.result = Some(result.clone());
        drop(gate);
        result
    }

    fn initialize(&self) -> Result<(), JournalError> {
        {
            let base = self.base.lock().unwrap_or_else(PoisonError::into_inner);
            if base.rebased {
                let deployment = serialize_deployment(&base.snapshot, false)
                    .map_err(|e| JournalError::serialization("serializing deployment", e))?;
                self.persister.rebase(&deployment)?;
            }
            self.olds.get_or_init(|| {
                base.snapshot
                    .resources
                    .iter()
                    .enumerate()
                    .map(|(i, live)| (live.handle(), i as i64 + 1))
                    .collect()
            });
        }

        if let Some(sm) = &self.secrets {
            self.append(
                JournalEntry::new(EntryKind::Secrets).with_secrets(SecretsProviders::of(sm.as_ref())),
            )?;
        }
        Ok(())
    }
}

/// Publishes the initialization outcome when dropped, including when `initialize`
/// unwinds, so waiters never block on a gate nobody will open.
struct InitGate<'j> {
    journal: &'j Journal,
    result: Option<Result<(), JournalError>>,
}

impl Drop for InitGate<'_> {
    fn drop(&mut self) {
        let result = self.result.take().unwrap_or_else(|| {
            Err(PersistenceError::Unavailable("journal initialization panicked".into()).into())
        });
        let mut init = self.journal.lock_init();
        *init = InitState::Done(result);
        self.journal.init_done.notify_all();
    }
}

/// Token for an in-flight step, handed out by [`Journal::begin_mutation`].
#[must_use = "a begun step must be ended"]
pub struct Mutation<'j> {
    journal: &'j Journal,
}

impl Mutation<'_> {
    pub fn end(self, step: &dyn Step, success: bool) -> Result<(), JournalError> {
        self.journal.end(step, success)
    }

    pub fn register_resource_outputs(&self, step: &dyn Step) -> Result<(), JournalError> {
        self.journal.register_resource_outputs(step)
    }
}

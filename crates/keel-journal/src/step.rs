//! The slice of the planner's step abstraction the journal depends on.

use std::sync::Arc;

use keel_state::{LiveState, ResourceState, StateHandle, Urn};

pub use keel_state::OpType as StepOp;

/// A resource step produced by the planner.
///
/// Live states are identified by their [`StateHandle`]; old states must come from the
/// journal's base snapshot, new states from the same arena.
pub trait Step: Send + Sync {
    fn op(&self) -> StepOp;

    fn urn(&self) -> &Urn;

    /// State the step replaces or retires, if any.
    fn old(&self) -> Option<&Arc<LiveState>>;

    /// State the step produces, if any.
    fn new(&self) -> Option<&Arc<LiveState>>;

    /// State recorded alongside the step's journal entries.
    fn res(&self) -> Option<&ResourceState> {
        self.new().or(self.old()).map(|live| live.state())
    }

    /// A `Same` step standing in for a create that was skipped.
    fn is_skipped_create(&self) -> bool {
        false
    }

    /// Handle that correlates the step's entries with each other: the new state's, or
    /// the old state's for steps that produce nothing.
    fn correlation_handle(&self) -> Option<StateHandle> {
        self.new().or(self.old()).map(|live| live.handle())
    }
}

/// Plain step value, used by tools and tests that drive a journal directly.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub op: StepOp,
    pub urn: Urn,
    pub old: Option<Arc<LiveState>>,
    pub new: Option<Arc<LiveState>>,
    /// Overrides the recorded state (e.g. freshly registered outputs).
    pub res: Option<ResourceState>,
    pub skipped_create: bool,
}

impl StepRecord {
    pub fn new(op: StepOp, urn: Urn) -> Self {
        Self {
            op,
            urn,
            old: None,
            new: None,
            res: None,
            skipped_create: false,
        }
    }

    /// Step whose URN is taken from the produced state.
    pub fn producing(op: StepOp, new: Arc<LiveState>) -> Self {
        let mut step = Self::new(op, new.urn.clone());
        step.new = Some(new);
        step
    }

    /// Step whose URN is taken from the retired state.
    pub fn retiring(op: StepOp, old: Arc<LiveState>) -> Self {
        let mut step = Self::new(op, old.urn.clone());
        step.old = Some(old);
        step
    }

    pub fn with_old(mut self, old: Arc<LiveState>) -> Self {
        self.old = Some(old);
        self
    }

    pub fn with_new(mut self, new: Arc<LiveState>) -> Self {
        self.new = Some(new);
        self
    }

    pub fn with_res(mut self, res: ResourceState) -> Self {
        self.res = Some(res);
        self
    }

    pub fn skipped_create(mut self) -> Self {
        self.skipped_create = true;
        self
    }
}

impl Step for StepRecord {
    fn op(&self) -> StepOp {
        self.op
    }

    fn urn(&self) -> &Urn {
        &self.urn
    }

    fn old(&self) -> Option<&Arc<LiveState>> {
        self.old.as_ref()
    }

    fn new(&self) -> Option<&Arc<LiveState>> {
        self.new.as_ref()
    }

    fn res(&self) -> Option<&ResourceState> {
        self.res
            .as_ref()
            .or_else(|| self.new.as_deref().map(LiveState::state))
            .or_else(|| self.old.as_deref().map(LiveState::state))
    }

    fn is_skipped_create(&self) -> bool {
        self.skipped_create
    }
}

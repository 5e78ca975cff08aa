use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::property::{PropertyKey, PropertyMap};
use crate::urn::{ResourceId, TypeToken, Urn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomTimeouts {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub create: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub update: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delete: f64,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

impl CustomTimeouts {
    pub fn is_empty(&self) -> bool {
        self.create == 0.0 && self.update == 0.0 && self.delete == 0.0
    }
}

/// Live state of one resource as the engine sees it (secrets decrypted).
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState {
    pub ty: TypeToken,
    pub urn: Urn,
    pub custom: bool,
    pub delete: bool,
    pub id: ResourceId,
    pub inputs: PropertyMap,
    pub outputs: PropertyMap,
    pub parent: Option<Urn>,
    pub protect: bool,
    pub external: bool,
    pub dependencies: Vec<Urn>,
    pub init_errors: Vec<String>,
    /// Provider reference string (`<urn>::<id>`), empty for default-less components.
    pub provider: String,
    pub property_dependencies: BTreeMap<PropertyKey, Vec<Urn>>,
    pub pending_replacement: bool,
    pub additional_secret_outputs: Vec<PropertyKey>,
    pub aliases: Vec<Urn>,
    pub custom_timeouts: CustomTimeouts,
    pub import_id: ResourceId,
    pub retain_on_delete: bool,
    pub deleted_with: Option<Urn>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub source_position: String,
}

impl ResourceState {
    /// Minimal state; the remaining fields are filled in by the caller.
    pub fn new(ty: TypeToken, urn: Urn, custom: bool, id: ResourceId) -> Self {
        Self {
            ty,
            urn,
            custom,
            delete: false,
            id,
            inputs: PropertyMap::new(),
            outputs: PropertyMap::new(),
            parent: None,
            protect: false,
            external: false,
            dependencies: Vec::new(),
            init_errors: Vec::new(),
            provider: String::new(),
            property_dependencies: BTreeMap::new(),
            pending_replacement: false,
            additional_secret_outputs: Vec::new(),
            aliases: Vec::new(),
            custom_timeouts: CustomTimeouts::default(),
            import_id: ResourceId::default(),
            retain_on_delete: false,
            deleted_with: None,
            created: None,
            modified: None,
            source_position: String::new(),
        }
    }

    pub fn is_provider(&self) -> bool {
        self.ty.is_provider_type()
    }
}

/// Dense identity of one live state object. Two states with equal contents are still
/// distinct resources to the journal, so correlation is by handle, not by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateHandle(u64);

impl StateHandle {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct LiveState {
    handle: StateHandle,
    state: ResourceState,
}

impl LiveState {
    pub fn handle(&self) -> StateHandle {
        self.handle
    }

    pub fn state(&self) -> &ResourceState {
        &self.state
    }
}

impl std::ops::Deref for LiveState {
    type Target = ResourceState;

    fn deref(&self) -> &ResourceState {
        &self.state
    }
}

/// Hands out state handles. Shared by everything that materializes live states
/// during one deployment.
#[derive(Debug, Default)]
pub struct StateArena {
    next: AtomicU64,
}

impl StateArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&self, state: ResourceState) -> Arc<LiveState> {
        let handle = StateHandle(self.next.fetch_add(1, Ordering::Relaxed));
        Arc::new(LiveState { handle, state })
    }

    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

use std::fmt;
use std::sync::Arc;

use crate::deployment::{Deployment, DeploymentError, Manifest, PendingOperation};
use crate::resource::{LiveState, StateArena};
use crate::secrets::{
    Decrypter, Encrypter, SecretsProviders, SharedSecretsManager, UnconfiguredCrypter,
    manager_from_providers,
};
use crate::serialize::{deserialize_resource, serialize_resource};

/// In-memory snapshot the engine plans against. Resource states are shared with the
/// steps that reference them; their handles identify them to the journal.
#[derive(Clone)]
pub struct Snapshot {
    pub manifest: Manifest,
    pub secrets_manager: Option<SharedSecretsManager>,
    pub resources: Vec<Arc<LiveState>>,
    /// Kept in wire form: they are only ever carried forward or shown to the user.
    pub pending_operations: Vec<PendingOperation>,
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("manifest", &self.manifest)
            .field(
                "secrets_manager",
                &self.secrets_manager.as_ref().map(|sm| sm.type_name().to_string()),
            )
            .field("resources", &self.resources)
            .field("pending_operations", &self.pending_operations)
            .finish()
    }
}

impl Snapshot {
    pub fn new(manifest: Manifest, secrets_manager: Option<SharedSecretsManager>) -> Self {
        Self {
            manifest,
            secrets_manager,
            resources: Vec::new(),
            pending_operations: Vec::new(),
        }
    }

    pub fn encrypter(&self) -> Result<Arc<dyn Encrypter>, DeploymentError> {
        match &self.secrets_manager {
            Some(sm) => Ok(sm.encrypter()?),
            None => Ok(Arc::new(UnconfiguredCrypter)),
        }
    }
}

/// Serializes a live snapshot. The snapshot's own secrets manager encrypts secret
/// values; without one any secret fails to serialize.
pub fn serialize_deployment(
    snap: &Snapshot,
    show_secrets: bool,
) -> Result<Deployment, DeploymentError> {
    let enc = snap.encrypter()?;
    let resources = snap
        .resources
        .iter()
        .map(|live| serialize_resource(live.state(), enc.as_ref(), show_secrets))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Deployment {
        manifest: snap.manifest.clone(),
        secrets_providers: snap
            .secrets_manager
            .as_ref()
            .map(|sm| SecretsProviders::of(sm.as_ref())),
        resources,
        pending_operations: snap.pending_operations.clone(),
    })
}

/// Rebuilds a live snapshot. `secrets_manager` overrides whatever the deployment
/// records; otherwise the recorded provider is restored when possible.
pub fn deserialize_deployment(
    deployment: &Deployment,
    arena: &StateArena,
    secrets_manager: Option<SharedSecretsManager>,
) -> Result<Snapshot, DeploymentError> {
    let manager = match (secrets_manager, &deployment.secrets_providers) {
        (Some(sm), _) => Some(sm),
        (None, Some(providers)) => Some(manager_from_providers(providers)?),
        (None, None) => None,
    };
    let dec: Arc<dyn Decrypter> = match &manager {
        Some(sm) => sm.decrypter()?,
        None => Arc::new(UnconfiguredCrypter),
    };

    let mut snap = Snapshot::new(deployment.manifest.clone(), manager);
    for res in &deployment.resources {
        snap.resources
            .push(arena.alloc(deserialize_resource(res, dec.as_ref())?));
    }
    snap.pending_operations = deployment.pending_operations.clone();
    Ok(snap)
}

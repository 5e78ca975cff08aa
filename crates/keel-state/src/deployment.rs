//! Serialized (wire) form of a deployment: the format persisted by backends and
//! produced by the journal replayer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::resource::CustomTimeouts;
use crate::secrets::{SecretsError, SecretsProviders};
use crate::urn::{ResourceId, TypeToken, Urn};

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Format version accepted by [`VersionedDeployment`].
pub const DEPLOYMENT_SCHEMA_VERSION: u32 = 3;

const MAGIC_FORMAT_TAG: &str = "keel/deployment/v3";

/// Engine version stamped into manifests written by this build.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Secrets(#[from] SecretsError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("number {0} cannot be represented in a deployment")]
    InvalidNumber(f64),
    #[error("malformed property value: {0}")]
    MalformedValue(String),
    #[error("unsupported deployment version {0} (expected {DEPLOYMENT_SCHEMA_VERSION})")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub time: DateTime<Utc>,
    pub magic: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginInfo>,
}

impl Manifest {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            magic: Self::magic_cookie(),
            version: version.into(),
            plugins: Vec::new(),
        }
    }

    /// Cookie every untampered manifest carries: hex SHA-256 of the format tag.
    pub fn magic_cookie() -> String {
        hex::encode(Sha256::digest(MAGIC_FORMAT_TAG.as_bytes()))
    }
}

/// One resource as persisted. Property maps hold the tagged wire representation,
/// so secrets in here are already encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResource {
    pub urn: Urn,
    pub custom: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub delete: bool,
    #[serde(default, skip_serializing_if = "ResourceId::is_empty")]
    pub id: ResourceId,
    #[serde(rename = "type")]
    pub ty: TypeToken,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub inputs: JsonMap,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub outputs: JsonMap,
    #[serde(default, skip_serializing_if = "Urn::is_empty")]
    pub parent: Urn,
    #[serde(default, skip_serializing_if = "is_false")]
    pub protect: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub external: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Urn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub property_dependencies: BTreeMap<String, Vec<Urn>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pending_replacement: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_secret_outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<Urn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_timeouts: Option<CustomTimeouts>,
    #[serde(default, rename = "importID", skip_serializing_if = "ResourceId::is_empty")]
    pub import_id: ResourceId,
    #[serde(default, skip_serializing_if = "is_false")]
    pub retain_on_delete: bool,
    #[serde(default, skip_serializing_if = "Urn::is_empty")]
    pub deleted_with: Urn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_position: String,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl SerializedResource {
    /// Bare resource with empty properties; mostly for tests and tools.
    pub fn new(urn: impl Into<Urn>, ty: impl Into<TypeToken>, custom: bool) -> Self {
        Self {
            urn: urn.into(),
            custom,
            delete: false,
            id: ResourceId::default(),
            ty: ty.into(),
            inputs: JsonMap::new(),
            outputs: JsonMap::new(),
            parent: Urn::default(),
            protect: false,
            external: false,
            dependencies: Vec::new(),
            init_errors: Vec::new(),
            provider: String::new(),
            property_dependencies: BTreeMap::new(),
            pending_replacement: false,
            additional_secret_outputs: Vec::new(),
            aliases: Vec::new(),
            custom_timeouts: None,
            import_id: ResourceId::default(),
            retain_on_delete: false,
            deleted_with: Urn::default(),
            created: None,
            modified: None,
            source_position: String::new(),
        }
    }
}

/// User-facing classification of an operation left in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Creating,
    Updating,
    Deleting,
    Reading,
    Importing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub resource: SerializedResource,
    #[serde(rename = "type")]
    pub ty: OperationType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub manifest: Manifest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_providers: Option<SecretsProviders>,
    #[serde(default)]
    pub resources: Vec<SerializedResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_operations: Vec<PendingOperation>,
}

impl Deployment {
    pub fn empty() -> Self {
        Self {
            manifest: Manifest::new(ENGINE_VERSION),
            secrets_providers: None,
            resources: Vec::new(),
            pending_operations: Vec::new(),
        }
    }
}

/// Version envelope around a deployment, as written to checkpoint files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedDeployment {
    pub version: u32,
    pub deployment: Deployment,
}

impl VersionedDeployment {
    pub fn new(deployment: Deployment) -> Self {
        Self {
            version: DEPLOYMENT_SCHEMA_VERSION,
            deployment,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Deployment, DeploymentError> {
        #[derive(Deserialize)]
        struct Envelope {
            version: u32,
            deployment: serde_json::Value,
        }
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.version != DEPLOYMENT_SCHEMA_VERSION {
            return Err(DeploymentError::UnsupportedVersion(envelope.version));
        }
        Ok(serde_json::from_value(envelope.deployment)?)
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>, DeploymentError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

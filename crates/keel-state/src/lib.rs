//! Deployment state model: resource states, the serialized snapshot format, alias
//! resolution, and snapshot integrity verification.

pub mod alias;
pub mod codec;
pub mod deployment;
pub mod entry;
pub mod integrity;
pub mod property;
pub mod provider;
pub mod resource;
pub mod secrets;
pub mod serialize;
pub mod snapshot;
pub mod urn;

pub use alias::AliasMap;
pub use codec::{Digest, to_canonical_cbor};
pub use deployment::{
    Deployment, DeploymentError, ENGINE_VERSION, Manifest, OperationType, PendingOperation,
    SerializedResource, VersionedDeployment,
};
pub use entry::{EntryKind, JournalEntry, JournalSeq, OpType, SKIPPED_CREATE_OLD};
pub use integrity::{IntegrityError, verify_integrity};
pub use property::{PropertyMap, PropertyValue};
pub use provider::ProviderReference;
pub use resource::{LiveState, ResourceState, StateArena, StateHandle};
pub use secrets::{
    Base64SecretsManager, Decrypter, Encrypter, SecretsError, SecretsManager, SecretsProviders,
    SharedSecretsManager, UnconfiguredCrypter,
};
pub use snapshot::{Snapshot, deserialize_deployment, serialize_deployment};
pub use urn::{ResourceId, TypeToken, Urn};

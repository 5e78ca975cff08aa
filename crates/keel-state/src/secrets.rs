//! Secrets capability consumed by the serializer.
//!
//! Encryption itself belongs to whichever manager the stack is configured with; this
//! module only defines the seams plus two managers the journal needs without any
//! backend: the fail-fast sentinel and the reversible `b64` manager.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretsError {
    #[error("no secrets manager configured")]
    NoSecretsManager,
    #[error("failed to decrypt secret: {0}")]
    Decrypt(String),
    #[error("unsupported secrets provider '{0}'")]
    UnsupportedProvider(String),
}

pub trait Encrypter: Send + Sync {
    fn encrypt_value(&self, plaintext: &str) -> Result<String, SecretsError>;
}

pub trait Decrypter: Send + Sync {
    fn decrypt_value(&self, ciphertext: &str) -> Result<String, SecretsError>;
}

pub trait SecretsManager: Send + Sync {
    /// Provider type recorded in the snapshot's secrets block.
    fn type_name(&self) -> &str;

    /// Opaque provider configuration recorded alongside the type.
    fn state(&self) -> serde_json::Value;

    fn encrypter(&self) -> Result<Arc<dyn Encrypter>, SecretsError>;

    fn decrypter(&self) -> Result<Arc<dyn Decrypter>, SecretsError>;
}

pub type SharedSecretsManager = Arc<dyn SecretsManager>;

/// Secrets block of a serialized deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretsProviders {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub state: serde_json::Value,
}

impl SecretsProviders {
    pub fn of(manager: &dyn SecretsManager) -> Self {
        Self {
            ty: manager.type_name().to_string(),
            state: manager.state(),
        }
    }
}

/// Stands in when neither the caller nor the base snapshot supplies a manager, so a
/// secret can never be written out in plaintext by accident.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredCrypter;

impl Encrypter for UnconfiguredCrypter {
    fn encrypt_value(&self, _plaintext: &str) -> Result<String, SecretsError> {
        Err(SecretsError::NoSecretsManager)
    }
}

impl Decrypter for UnconfiguredCrypter {
    fn decrypt_value(&self, _ciphertext: &str) -> Result<String, SecretsError> {
        Err(SecretsError::NoSecretsManager)
    }
}

pub const BASE64_PROVIDER_TYPE: &str = "b64";

/// Reversible encoding with no confidentiality.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64SecretsManager;

#[derive(Debug, Default, Clone, Copy)]
struct Base64Crypter;

impl Encrypter for Base64Crypter {
    fn encrypt_value(&self, plaintext: &str) -> Result<String, SecretsError> {
        Ok(BASE64.encode(plaintext.as_bytes()))
    }
}

impl Decrypter for Base64Crypter {
    fn decrypt_value(&self, ciphertext: &str) -> Result<String, SecretsError> {
        let bytes = BASE64
            .decode(ciphertext)
            .map_err(|err| SecretsError::Decrypt(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| SecretsError::Decrypt(err.to_string()))
    }
}

impl SecretsManager for Base64SecretsManager {
    fn type_name(&self) -> &str {
        BASE64_PROVIDER_TYPE
    }

    fn state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn encrypter(&self) -> Result<Arc<dyn Encrypter>, SecretsError> {
        Ok(Arc::new(Base64Crypter))
    }

    fn decrypter(&self) -> Result<Arc<dyn Decrypter>, SecretsError> {
        Ok(Arc::new(Base64Crypter))
    }
}

/// Rebuilds a manager from a recorded secrets block. Only managers that need no
/// external key material can be restored here.
pub fn manager_from_providers(
    providers: &SecretsProviders,
) -> Result<SharedSecretsManager, SecretsError> {
    match providers.ty.as_str() {
        BASE64_PROVIDER_TYPE => Ok(Arc::new(Base64SecretsManager)),
        other => Err(SecretsError::UnsupportedProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_crypter_fails_fast() {
        assert_eq!(
            UnconfiguredCrypter.encrypt_value("x"),
            Err(SecretsError::NoSecretsManager)
        );
        assert_eq!(
            UnconfiguredCrypter.decrypt_value("x"),
            Err(SecretsError::NoSecretsManager)
        );
    }

    #[test]
    fn base64_manager_round_trips_and_restores() {
        let manager = Base64SecretsManager;
        let enc = manager.encrypter().unwrap();
        let dec = manager.decrypter().unwrap();
        let cipher = enc.encrypt_value("s3cr3t").unwrap();
        assert_ne!(cipher, "s3cr3t");
        assert_eq!(dec.decrypt_value(&cipher).unwrap(), "s3cr3t");

        let block = SecretsProviders::of(&manager);
        assert_eq!(block.ty, "b64");
        assert!(manager_from_providers(&block).is_ok());
        let other = SecretsProviders {
            ty: "awskms".into(),
            state: serde_json::Value::Null,
        };
        assert!(matches!(
            manager_from_providers(&other),
            Err(SecretsError::UnsupportedProvider(_))
        ));
    }
}

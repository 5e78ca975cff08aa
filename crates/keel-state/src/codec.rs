//! Canonical CBOR encoding and SHA-256 fingerprints of snapshot data.

use std::fmt;

use serde::Serialize;
use serde_cbor::value::Value as CborValue;
use sha2::{Digest as _, Sha256};

pub const DIGEST_PREFIX: &str = "sha256:";

/// Encodes a value as self-described CBOR with map keys in canonical order, so equal
/// values always produce equal bytes.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_cbor::Error> {
    // Going through `Value` sorts map keys (its maps are BTreeMaps).
    let canonical: CborValue = serde_cbor::value::to_value(value)?;
    let mut buf = Vec::with_capacity(256);
    let mut serializer = serde_cbor::ser::Serializer::new(&mut buf);
    serializer.self_describe()?;
    canonical.serialize(&mut serializer)?;
    Ok(buf)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&Sha256::digest(bytes));
        Digest(arr)
    }

    /// Digest of the value's canonical CBOR encoding.
    pub fn of_cbor<T: Serialize>(value: &T) -> Result<Self, serde_cbor::Error> {
        Ok(Self::of_bytes(&to_canonical_cbor(value)?))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("{DIGEST_PREFIX}{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Digest").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

//! Provider references: the `<urn>::<id>` strings resources use to name their provider.

use std::fmt;

use thiserror::Error;

use crate::urn::{ResourceId, Urn};

const REFERENCE_DELIMITER: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderRefError {
    #[error("'{0}' is not a valid provider reference (expected '<urn>::<id>')")]
    Malformed(String),
    #[error("{0} is not a provider resource")]
    NotAProvider(Urn),
    #[error("provider {0} has no id")]
    MissingId(Urn),
}

/// Names one provider instance: the provider resource's URN plus its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderReference {
    urn: Urn,
    id: ResourceId,
}

impl ProviderReference {
    pub fn new(urn: Urn, id: ResourceId) -> Result<Self, ProviderRefError> {
        let is_provider = urn
            .type_token()
            .is_some_and(|ty| ty.is_provider_type());
        if !is_provider {
            return Err(ProviderRefError::NotAProvider(urn));
        }
        if id.is_empty() {
            return Err(ProviderRefError::MissingId(urn));
        }
        Ok(Self { urn, id })
    }

    /// Parses `<urn>::<id>`. URNs contain `::` themselves, so the split is on the last one.
    pub fn parse(s: &str) -> Result<Self, ProviderRefError> {
        let (urn, id) = s
            .rsplit_once(REFERENCE_DELIMITER)
            .ok_or_else(|| ProviderRefError::Malformed(s.to_string()))?;
        let urn = Urn::parse(urn).map_err(|_| ProviderRefError::Malformed(s.to_string()))?;
        Self::new(urn, ResourceId::new(id))
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn with_urn(&self, urn: Urn) -> Result<Self, ProviderRefError> {
        Self::new(urn, self.id.clone())
    }
}

impl fmt::Display for ProviderReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{REFERENCE_DELIMITER}{}", self.urn, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AWS: &str = "urn:pulumi:dev::site::pulumi:providers:aws::default";

    #[test]
    fn parses_on_last_delimiter() {
        let s = format!("{AWS}::abc-123");
        let reference = ProviderReference::parse(&s).unwrap();
        assert_eq!(reference.urn().as_str(), AWS);
        assert_eq!(reference.id().as_str(), "abc-123");
        assert_eq!(reference.to_string(), s);
    }

    #[test]
    fn rejects_non_provider_urn() {
        let err = ProviderReference::parse("urn:pulumi:dev::site::aws:s3:Bucket::b::id").unwrap_err();
        assert!(matches!(err, ProviderRefError::NotAProvider(_)));
        assert!(matches!(
            ProviderReference::parse(&format!("{AWS}::")),
            Err(ProviderRefError::MissingId(_))
        ));
        assert!(matches!(
            ProviderReference::parse("garbage"),
            Err(ProviderRefError::Malformed(_))
        ));
    }
}

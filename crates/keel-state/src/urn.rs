//! Resource names, ids and type tokens.
//!
//! A URN has the shape `urn:pulumi:<stack>::<project>::<qualified-type>::<name>`,
//! where the qualified type is the chain of parent types and the resource's own type
//! joined by `$`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const URN_PREFIX: &str = "urn:pulumi:";
const URN_NAME_DELIMITER: &str = "::";
const URN_TYPE_DELIMITER: char = '$';

/// Placeholder id for resources whose id is not known yet (previews).
pub const UNKNOWN_ID: &str = "04da6b54-80e4-46f7-96ec-b56ff0331ba9";

const PROVIDER_TYPE_PREFIX: &str = "pulumi:providers:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrnError {
    #[error("URN '{0}' is missing the '{URN_PREFIX}' prefix")]
    MissingPrefix(String),
    #[error("URN '{0}' must have four '::'-separated parts")]
    WrongArity(String),
    #[error("URN '{0}' has an empty type")]
    EmptyType(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Urn(String);

impl Urn {
    pub fn new(
        stack: &str,
        project: &str,
        parent_type: Option<&TypeToken>,
        ty: &TypeToken,
        name: &str,
    ) -> Self {
        let qualified = match parent_type {
            Some(parent) => format!("{}{URN_TYPE_DELIMITER}{}", parent.as_str(), ty.as_str()),
            None => ty.as_str().to_string(),
        };
        Urn(format!(
            "{URN_PREFIX}{stack}{URN_NAME_DELIMITER}{project}{URN_NAME_DELIMITER}{qualified}{URN_NAME_DELIMITER}{name}"
        ))
    }

    pub fn parse(s: &str) -> Result<Self, UrnError> {
        let urn = Urn(s.to_string());
        urn.parts()?;
        Ok(urn)
    }

    /// Wraps a string without validation. Wire data is carried verbatim and only
    /// checked where a component is actually needed.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Urn(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.parts().is_ok()
    }

    pub fn stack(&self) -> Option<&str> {
        self.parts().ok().map(|p| p.0)
    }

    pub fn project(&self) -> Option<&str> {
        self.parts().ok().map(|p| p.1)
    }

    pub fn qualified_type(&self) -> Option<&str> {
        self.parts().ok().map(|p| p.2)
    }

    /// The resource's own type token (last segment of the qualified type).
    pub fn type_token(&self) -> Option<TypeToken> {
        self.qualified_type().map(|q| {
            let last = q.rsplit(URN_TYPE_DELIMITER).next().unwrap_or(q);
            TypeToken::new(last)
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.parts().ok().map(|p| p.3)
    }

    fn parts(&self) -> Result<(&str, &str, &str, &str), UrnError> {
        let rest = self
            .0
            .strip_prefix(URN_PREFIX)
            .ok_or_else(|| UrnError::MissingPrefix(self.0.clone()))?;
        let mut split = rest.splitn(4, URN_NAME_DELIMITER);
        match (split.next(), split.next(), split.next(), split.next()) {
            (Some(stack), Some(project), Some(qualified), Some(name)) => {
                if qualified.is_empty() {
                    return Err(UrnError::EmptyType(self.0.clone()));
                }
                Ok((stack, project, qualified, name))
            }
            _ => Err(UrnError::WrongArity(self.0.clone())),
        }
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Urn {
    fn from(value: &str) -> Self {
        Urn::from_raw(value)
    }
}

/// Provider-assigned resource id. Empty for component resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        ResourceId(id.into())
    }

    pub fn unknown() -> Self {
        ResourceId(UNKNOWN_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_ID
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        ResourceId::new(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeToken(String);

impl TypeToken {
    pub fn new(token: impl Into<String>) -> Self {
        TypeToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Provider resources are typed `pulumi:providers:<package>`.
    pub fn is_provider_type(&self) -> bool {
        self.0
            .strip_prefix(PROVIDER_TYPE_PREFIX)
            .is_some_and(|pkg| !pkg.is_empty())
    }

    pub fn provider(package: &str) -> Self {
        TypeToken(format!("{PROVIDER_TYPE_PREFIX}{package}"))
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeToken {
    fn from(value: &str) -> Self {
        TypeToken::new(value)
    }
}

//! Live (decrypted) property values.

use std::collections::BTreeMap;

use crate::urn::{ResourceId, Urn};

pub type PropertyKey = String;

/// Property bag keyed in sorted order so serialization is deterministic.
pub type PropertyMap = BTreeMap<PropertyKey, PropertyValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<PropertyValue>),
    Object(PropertyMap),
    /// Plaintext wrapped as secret; encrypted when serialized.
    Secret(Box<PropertyValue>),
    /// Value not known until the resource is created.
    Computed,
    Output(OutputValue),
    ResourceReference(ResourceReference),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    /// `None` when the value is unknown.
    pub element: Option<Box<PropertyValue>>,
    pub secret: bool,
    pub dependencies: Vec<Urn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReference {
    pub urn: Urn,
    pub id: Option<Box<PropertyValue>>,
    pub package_version: String,
}

impl PropertyValue {
    pub fn string(s: impl Into<String>) -> Self {
        PropertyValue::String(s.into())
    }

    pub fn secret(value: PropertyValue) -> Self {
        PropertyValue::Secret(Box::new(value))
    }

    pub fn is_secret(&self) -> bool {
        match self {
            PropertyValue::Secret(_) => true,
            PropertyValue::Output(out) => out.secret,
            _ => false,
        }
    }

    pub fn contains_secrets(&self) -> bool {
        match self {
            PropertyValue::Secret(_) => true,
            PropertyValue::Output(out) => {
                out.secret || out.element.as_deref().is_some_and(Self::contains_secrets)
            }
            PropertyValue::Array(items) => items.iter().any(Self::contains_secrets),
            PropertyValue::Object(map) => map.values().any(Self::contains_secrets),
            _ => false,
        }
    }

    pub fn contains_unknowns(&self) -> bool {
        match self {
            PropertyValue::Computed => true,
            PropertyValue::Output(out) => match &out.element {
                None => true,
                Some(inner) => inner.contains_unknowns(),
            },
            PropertyValue::Secret(inner) => inner.contains_unknowns(),
            PropertyValue::Array(items) => items.iter().any(Self::contains_unknowns),
            PropertyValue::Object(map) => map.values().any(Self::contains_unknowns),
            _ => false,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<ResourceId> for PropertyValue {
    fn from(value: ResourceId) -> Self {
        PropertyValue::String(value.as_str().to_string())
    }
}

pub fn map_contains_secrets(map: &PropertyMap) -> bool {
    map.values().any(PropertyValue::contains_secrets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_nested_secrets_and_unknowns() {
        let mut inner = PropertyMap::new();
        inner.insert("password".into(), PropertyValue::secret("hunter2".into()));
        let value = PropertyValue::Array(vec![PropertyValue::Null, PropertyValue::Object(inner)]);
        assert!(value.contains_secrets());
        assert!(!value.contains_unknowns());

        let out = PropertyValue::Output(OutputValue {
            element: None,
            secret: false,
            dependencies: vec![],
        });
        assert!(out.contains_unknowns());
        assert!(!out.contains_secrets());
    }
}

//! Conversion between live states and their wire representation.
//!
//! Special values are encoded as JSON objects tagged with a signature key so that
//! they can be told apart from user data: secrets carry their encrypted payload as
//! `ciphertext` (or `plaintext` when secrets are being shown), outputs and resource
//! references carry their components. Unknown values are encoded as the unknown-id
//! sentinel string.

use serde_json::{Number, Value};

use crate::deployment::{DeploymentError, JsonMap, SerializedResource};
use crate::property::{OutputValue, PropertyMap, PropertyValue, ResourceReference};
use crate::resource::ResourceState;
use crate::secrets::{Decrypter, Encrypter};
use crate::urn::{UNKNOWN_ID, Urn};

pub const SIG_KEY: &str = "4dabf18193072939515e22adb298388d";
pub const SECRET_SIG: &str = "1b47061264138c4ac30d75fd1eb44270";
pub const RESOURCE_REFERENCE_SIG: &str = "5cf8f73096256a8f31e491e813e4eb8e";
pub const OUTPUT_VALUE_SIG: &str = "d0e6a833031e9bbcd3f4e8bde6ca49a4";

pub fn serialize_properties(
    props: &PropertyMap,
    enc: &dyn Encrypter,
    show_secrets: bool,
) -> Result<JsonMap, DeploymentError> {
    let mut out = JsonMap::new();
    for (key, value) in props {
        out.insert(key.clone(), serialize_value(value, enc, show_secrets)?);
    }
    Ok(out)
}

pub fn serialize_value(
    value: &PropertyValue,
    enc: &dyn Encrypter,
    show_secrets: bool,
) -> Result<Value, DeploymentError> {
    Ok(match value {
        PropertyValue::Null => Value::Null,
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Number(n) => {
            Value::Number(Number::from_f64(*n).ok_or(DeploymentError::InvalidNumber(*n))?)
        }
        PropertyValue::String(s) => Value::String(s.clone()),
        PropertyValue::Computed => Value::String(UNKNOWN_ID.to_string()),
        PropertyValue::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| serialize_value(item, enc, show_secrets))
                .collect::<Result<_, _>>()?,
        ),
        PropertyValue::Object(map) => Value::Object(serialize_properties(map, enc, show_secrets)?),
        PropertyValue::Secret(inner) => {
            let element = serialize_value(inner, enc, show_secrets)?;
            let plaintext = serde_json::to_string(&element)?;
            let mut obj = JsonMap::new();
            obj.insert(SIG_KEY.into(), Value::String(SECRET_SIG.into()));
            if show_secrets {
                obj.insert("plaintext".into(), Value::String(plaintext));
            } else {
                obj.insert(
                    "ciphertext".into(),
                    Value::String(enc.encrypt_value(&plaintext)?),
                );
            }
            Value::Object(obj)
        }
        PropertyValue::Output(out) => {
            let mut obj = JsonMap::new();
            obj.insert(SIG_KEY.into(), Value::String(OUTPUT_VALUE_SIG.into()));
            if let Some(element) = &out.element {
                obj.insert("value".into(), serialize_value(element, enc, show_secrets)?);
            }
            if out.secret {
                obj.insert("secret".into(), Value::Bool(true));
            }
            if !out.dependencies.is_empty() {
                obj.insert(
                    "dependencies".into(),
                    Value::Array(
                        out.dependencies
                            .iter()
                            .map(|urn| Value::String(urn.as_str().to_string()))
                            .collect(),
                    ),
                );
            }
            Value::Object(obj)
        }
        PropertyValue::ResourceReference(reference) => {
            let mut obj = JsonMap::new();
            obj.insert(SIG_KEY.into(), Value::String(RESOURCE_REFERENCE_SIG.into()));
            obj.insert("urn".into(), Value::String(reference.urn.as_str().to_string()));
            if let Some(id) = &reference.id {
                obj.insert("id".into(), serialize_value(id, enc, show_secrets)?);
            }
            if !reference.package_version.is_empty() {
                obj.insert(
                    "packageVersion".into(),
                    Value::String(reference.package_version.clone()),
                );
            }
            Value::Object(obj)
        }
    })
}

pub fn deserialize_properties(
    map: &JsonMap,
    dec: &dyn Decrypter,
) -> Result<PropertyMap, DeploymentError> {
    let mut out = PropertyMap::new();
    for (key, value) in map {
        out.insert(key.clone(), deserialize_value(value, dec)?);
    }
    Ok(out)
}

pub fn deserialize_value(value: &Value, dec: &dyn Decrypter) -> Result<PropertyValue, DeploymentError> {
    Ok(match value {
        Value::Null => PropertyValue::Null,
        Value::Bool(b) => PropertyValue::Bool(*b),
        Value::Number(n) => PropertyValue::Number(
            n.as_f64()
                .ok_or_else(|| DeploymentError::MalformedValue(format!("number {n}")))?,
        ),
        Value::String(s) if s == UNKNOWN_ID => PropertyValue::Computed,
        Value::String(s) => PropertyValue::String(s.clone()),
        Value::Array(items) => PropertyValue::Array(
            items
                .iter()
                .map(|item| deserialize_value(item, dec))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(obj) => match obj.get(SIG_KEY).and_then(Value::as_str) {
            None => PropertyValue::Object(deserialize_properties(obj, dec)?),
            Some(SECRET_SIG) => deserialize_secret(obj, dec)?,
            Some(OUTPUT_VALUE_SIG) => PropertyValue::Output(OutputValue {
                element: obj
                    .get("value")
                    .map(|v| deserialize_value(v, dec).map(Box::new))
                    .transpose()?,
                secret: obj.get("secret").and_then(Value::as_bool).unwrap_or(false),
                dependencies: obj
                    .get("dependencies")
                    .and_then(Value::as_array)
                    .map(|deps| {
                        deps.iter()
                            .filter_map(Value::as_str)
                            .map(Urn::from_raw)
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            Some(RESOURCE_REFERENCE_SIG) => {
                let urn = obj.get("urn").and_then(Value::as_str).ok_or_else(|| {
                    DeploymentError::MalformedValue("resource reference without urn".into())
                })?;
                PropertyValue::ResourceReference(ResourceReference {
                    urn: Urn::from_raw(urn),
                    id: obj
                        .get("id")
                        .map(|v| deserialize_value(v, dec).map(Box::new))
                        .transpose()?,
                    package_version: obj
                        .get("packageVersion")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            }
            Some(other) => {
                return Err(DeploymentError::MalformedValue(format!(
                    "unknown signature {other}"
                )));
            }
        },
    })
}

fn deserialize_secret(obj: &JsonMap, dec: &dyn Decrypter) -> Result<PropertyValue, DeploymentError> {
    let plaintext = match (obj.get("ciphertext"), obj.get("plaintext")) {
        (Some(Value::String(cipher)), _) => dec.decrypt_value(cipher)?,
        (None, Some(Value::String(plain))) => plain.clone(),
        _ => {
            return Err(DeploymentError::MalformedValue(
                "secret without ciphertext or plaintext".into(),
            ));
        }
    };
    let element: Value = serde_json::from_str(&plaintext)?;
    Ok(PropertyValue::secret(deserialize_value(&element, dec)?))
}

pub fn serialize_resource(
    state: &ResourceState,
    enc: &dyn Encrypter,
    show_secrets: bool,
) -> Result<SerializedResource, DeploymentError> {
    Ok(SerializedResource {
        urn: state.urn.clone(),
        custom: state.custom,
        delete: state.delete,
        id: state.id.clone(),
        ty: state.ty.clone(),
        inputs: serialize_properties(&state.inputs, enc, show_secrets)?,
        outputs: serialize_properties(&state.outputs, enc, show_secrets)?,
        parent: state.parent.clone().unwrap_or_default(),
        protect: state.protect,
        external: state.external,
        dependencies: state.dependencies.clone(),
        init_errors: state.init_errors.clone(),
        provider: state.provider.clone(),
        property_dependencies: state.property_dependencies.clone(),
        pending_replacement: state.pending_replacement,
        additional_secret_outputs: state.additional_secret_outputs.clone(),
        aliases: state.aliases.clone(),
        custom_timeouts: (!state.custom_timeouts.is_empty()).then(|| state.custom_timeouts.clone()),
        import_id: state.import_id.clone(),
        retain_on_delete: state.retain_on_delete,
        deleted_with: state.deleted_with.clone().unwrap_or_default(),
        created: state.created,
        modified: state.modified,
        source_position: state.source_position.clone(),
    })
}

pub fn deserialize_resource(
    res: &SerializedResource,
    dec: &dyn Decrypter,
) -> Result<ResourceState, DeploymentError> {
    let mut state = ResourceState::new(res.ty.clone(), res.urn.clone(), res.custom, res.id.clone());
    state.delete = res.delete;
    state.inputs = deserialize_properties(&res.inputs, dec)?;
    state.outputs = deserialize_properties(&res.outputs, dec)?;
    state.parent = (!res.parent.is_empty()).then(|| res.parent.clone());
    state.protect = res.protect;
    state.external = res.external;
    state.dependencies = res.dependencies.clone();
    state.init_errors = res.init_errors.clone();
    state.provider = res.provider.clone();
    state.property_dependencies = res.property_dependencies.clone();
    state.pending_replacement = res.pending_replacement;
    state.additional_secret_outputs = res.additional_secret_outputs.clone();
    state.aliases = res.aliases.clone();
    state.custom_timeouts = res.custom_timeouts.clone().unwrap_or_default();
    state.import_id = res.import_id.clone();
    state.retain_on_delete = res.retain_on_delete;
    state.deleted_with = (!res.deleted_with.is_empty()).then(|| res.deleted_with.clone());
    state.created = res.created;
    state.modified = res.modified;
    state.source_position = res.source_position.clone();
    Ok(state)
}

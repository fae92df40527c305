//! Resource references and payloads.
//!
//! A [`ResourceData`] carries the three keys the identity cache reconciles:
//! the resource `type`, the server-assigned `id` and the client-local `lid`.
//! It is deliberately loose: every key is optional, because callers hand the
//! cache bare references (`{type, id}`), drafts (`{type, lid}`) and partial
//! updates (`{id}`) alike.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A bare reference to, or a payload of, a remote resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceData {
    /// Resource type (e.g. "person", "tag").
    #[serde(
        rename = "type",
        default,
        deserialize_with = "non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_type: Option<String>,
    /// Server-assigned id. Numbers are coerced to strings on parse.
    #[serde(
        default,
        deserialize_with = "coerced_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Client-local id.
    #[serde(
        default,
        deserialize_with = "non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub lid: Option<String>,
}

impl ResourceData {
    /// A reference carrying only a type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            id: None,
            lid: None,
        }
    }

    /// A `{type, id}` reference.
    pub fn reference(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(resource_type).with_id(id)
    }

    /// A payload carrying only an id, used for partial updates.
    pub fn with_only_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_lid(mut self, lid: impl Into<String>) -> Self {
        self.lid = Some(lid.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Returns a copy with the local key removed.
    #[must_use]
    pub fn without_lid(&self) -> Self {
        Self {
            lid: None,
            ..self.clone()
        }
    }

    /// Returns a copy with the external id removed.
    #[must_use]
    pub fn without_id(&self) -> Self {
        Self {
            id: None,
            ..self.clone()
        }
    }

    /// The resource type, if present and non-empty.
    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref().filter(|s| !s.is_empty())
    }

    /// The external id, if present and non-empty.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|s| !s.is_empty())
    }

    /// The local id, if present and non-empty.
    pub fn lid(&self) -> Option<&str> {
        self.lid.as_deref().filter(|s| !s.is_empty())
    }

    /// Reads the key fields out of a JSON resource object.
    ///
    /// Attributes, relationships and any other members are ignored.
    pub fn from_json(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidResource(format!(
                "expected a JSON object, got {value}"
            )));
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Parses a JSON resource object from a string.
    pub fn parse(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }
}

/// Coerces a JSON id into its string form.
///
/// Strings pass through, numbers become their decimal representation, and
/// `null`, empty strings and every other JSON kind yield `None`.
pub fn coerce_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerced_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v @ (Value::String(_) | Value::Number(_))) => Ok(coerce_id(&v)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "id must be a string or a number, got {other}"
        ))),
    }
}

fn non_empty<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

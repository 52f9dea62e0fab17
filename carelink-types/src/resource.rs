//! Resource addressing.
//!
//! A clinical resource is addressed as `{resourceType}/{id}`. Resource
//! bodies are opaque JSON; only `resourceType`, `id` and `meta.versionId`
//! are ever inspected by the client.

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A `{resourceType}/{id}` pair identifying one stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// The resource type (e.g. `Patient`, `Observation`).
    pub resource_type: String,
    /// The server-assigned identifier.
    pub id: String,
}

impl ResourceKey {
    /// Creates a key from its parts.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Reads the key out of a resource body. Both `resourceType` and `id`
    /// must be present and non-empty.
    pub fn from_resource(resource: &Value) -> crate::Result<Self> {
        let resource_type = resource_type_of(resource)
            .ok_or_else(|| Error::InvalidResourceKey("resource has no resourceType".into()))?;
        let id = resource_id_of(resource)
            .ok_or_else(|| Error::InvalidResourceKey("resource has no id".into()))?;
        Ok(Self::new(resource_type, id))
    }

    /// Parses `Type/id`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.split_once('/') {
            Some((ty, id)) if !ty.is_empty() && !id.is_empty() && !id.contains('/') => {
                Ok(Self::new(ty, id))
            }
            _ => Err(Error::InvalidResourceKey(s.to_string())),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

impl FromStr for ResourceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Returns the non-empty `resourceType` of a resource body.
pub fn resource_type_of(resource: &Value) -> Option<&str> {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Returns the non-empty `id` of a resource body.
pub fn resource_id_of(resource: &Value) -> Option<&str> {
    resource
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Returns `meta.versionId` of a resource body, if any.
pub fn version_id_of(resource: &Value) -> Option<&str> {
    resource
        .get("meta")
        .and_then(|m| m.get("versionId"))
        .and_then(Value::as_str)
}

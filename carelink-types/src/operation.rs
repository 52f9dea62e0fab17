//! Batch operations.
//!
//! A `BatchOperation` is one create/read/update/delete/search call against
//! the record service. Operations are immutable once built; the only way to
//! change one is to build a new one. Whichever queue currently holds an
//! operation owns it.

use crate::{OperationId, ResourceKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The kind of call an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Create,
    Read,
    Update,
    Delete,
    Search,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Search => "search",
        }
    }

    /// Whether the method changes server state.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optimistic-concurrency headers carried with a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalHeaders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_match: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_none_match: Option<String>,
}

impl ConditionalHeaders {
    /// `If-Match` against a resource version, in weak-ETag form.
    pub fn if_match_version(version_id: &str) -> Self {
        Self {
            if_match: Some(format!("W/\"{version_id}\"")),
            if_none_match: None,
        }
    }
}

/// One operation inside a batch (or sent on its own).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    id: OperationId,
    method: Method,
    /// `Type`, `Type/id`, or `Type?query` for searches.
    target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conditional: Option<ConditionalHeaders>,
}

impl BatchOperation {
    fn build(method: Method, target: String, resource: Option<Value>) -> Self {
        Self {
            id: OperationId::new(),
            method,
            target,
            resource,
            conditional: None,
        }
    }

    /// Creates a new resource of the given type.
    pub fn create(resource_type: impl Into<String>, resource: Value) -> Self {
        Self::build(Method::Create, resource_type.into(), Some(resource))
    }

    /// Reads one resource.
    pub fn read(key: &ResourceKey) -> Self {
        Self::build(Method::Read, key.to_string(), None)
    }

    /// Replaces one resource.
    pub fn update(key: &ResourceKey, resource: Value) -> Self {
        Self::build(Method::Update, key.to_string(), Some(resource))
    }

    /// Deletes one resource.
    pub fn delete(key: &ResourceKey) -> Self {
        Self::build(Method::Delete, key.to_string(), None)
    }

    /// Searches a resource type. Parameters are URL-encoded in the order
    /// given.
    pub fn search<K, V>(resource_type: &str, params: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut target = resource_type.to_string();
        for (i, (k, v)) in params.iter().enumerate() {
            target.push(if i == 0 { '?' } else { '&' });
            target.push_str(&urlencoding::encode(k.as_ref()));
            target.push('=');
            target.push_str(&urlencoding::encode(v.as_ref()));
        }
        Self::build(Method::Search, target, None)
    }

    /// Attaches conditional headers.
    #[must_use]
    pub fn with_conditional(mut self, headers: ConditionalHeaders) -> Self {
        self.conditional = Some(headers);
        self
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn resource(&self) -> Option<&Value> {
        self.resource.as_ref()
    }

    pub fn conditional(&self) -> Option<&ConditionalHeaders> {
        self.conditional.as_ref()
    }

    /// The resource type the target addresses.
    pub fn resource_type(&self) -> &str {
        let end = self
            .target
            .find(['/', '?'])
            .unwrap_or(self.target.len());
        &self.target[..end]
    }

    /// Logical endpoint used for timing statistics, e.g. `read:Patient`.
    pub fn endpoint_key(&self) -> String {
        format!("{}:{}", self.method, self.resource_type())
    }
}

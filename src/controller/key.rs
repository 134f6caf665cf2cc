//! # Object Keys
//!
//! Stable deduplication identity for observed objects.
//!
//! A key is `namespace/name` for namespaced objects and `name` for
//! cluster-scoped ones, matching the string form used by `kubectl` and by
//! the work queue's logs and metrics.

use std::fmt;
use std::str::FromStr;

use kube::Resource;
use thiserror::Error;

/// Failure to derive or parse an [`ObjectKey`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("object has no metadata.name")]
    MissingName,
    #[error("invalid object key '{0}', expected 'name' or 'namespace/name'")]
    InvalidKey(String),
}

/// Identity of an observed object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    /// Key for a namespaced object
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object
    #[must_use]
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let invalid = || KeyError::InvalidKey(key.to_string());
        let mut parts = key.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster_scoped(name)),
            (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::namespaced(namespace, name))
            }
            _ => Err(invalid()),
        }
    }
}

/// Derive the key of a Kubernetes object from its metadata.
///
/// An empty namespace is treated as cluster-scoped.
///
/// # Errors
///
/// Returns [`KeyError::MissingName`] if the object has no name.
pub fn object_key<K: Resource>(obj: &K) -> Result<ObjectKey, KeyError> {
    let meta = obj.meta();
    let name = meta
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(KeyError::MissingName)?;

    Ok(match meta.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        Some(namespace) => ObjectKey::namespaced(namespace, name),
        None => ObjectKey::cluster_scoped(name),
    })
}

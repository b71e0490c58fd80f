//! Key types shared across the registry.

use crate::error::{RegistryError, Result};
use crate::id::PersistentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable key naming a container (scene) whose identifiers are tracked together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Create a scope key. Empty or whitespace-only keys are rejected.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(RegistryError::InvalidScope { scope: key });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ScopeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Runtime identity of an object holding an identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for an object named `name` inside `scope`.
    pub fn scoped(scope: &ScopeKey, name: &str) -> Self {
        Self(format!("{}/{}", scope, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live (object, identifier) binding reported by the object graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveObject {
    pub object: ObjectKey,
    pub id: PersistentId,
}

impl LiveObject {
    pub fn new(object: impl Into<String>, id: impl Into<PersistentId>) -> Self {
        Self {
            object: ObjectKey::new(object),
            id: id.into(),
        }
    }
}

/// An identifier change applied to one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reassignment {
    pub scope: ScopeKey,
    pub object: ObjectKey,
    pub previous: PersistentId,
    pub assigned: PersistentId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key_rejects_empty() {
        assert!(ScopeKey::new("").is_err());
        assert!(ScopeKey::new("   ").is_err());
        assert_eq!(ScopeKey::new("sceneA").unwrap().as_str(), "sceneA");
    }

    #[test]
    fn test_scoped_object_key() {
        let scope = ScopeKey::new("level1").unwrap();
        assert_eq!(ObjectKey::scoped(&scope, "door").as_str(), "level1/door");
    }
}

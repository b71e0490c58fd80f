//! Object enumeration collaborators.
//!
//! The registry never owns objects. Whatever hosts them (an editor, a scene
//! directory, a test) implements [`ObjectGraph`] so validation can compare the
//! persisted state against what is actually live.

use crate::id::PersistentId;
use crate::types::{LiveObject, ObjectKey, ScopeKey};
use crate::{RegistryError, Result};
use std::collections::BTreeMap;

/// Read access to the live objects of every scope.
pub trait ObjectGraph {
    /// Every scope that currently exists in the host.
    fn scopes(&self) -> Result<Vec<ScopeKey>>;

    /// Live (object, identifier) pairs in `scope`. Unknown scopes yield an
    /// empty list.
    fn live_objects(&self, scope: &ScopeKey) -> Result<Vec<LiveObject>>;
}

/// Write access, used by allocation passes and repair.
pub trait ObjectGraphMut: ObjectGraph {
    /// Store `id` on `object` in `scope`.
    fn assign(&mut self, scope: &ScopeKey, object: &ObjectKey, id: PersistentId) -> Result<()>;
}

/// Object graph held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    scopes: BTreeMap<ScopeKey, Vec<LiveObject>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object, creating the scope if needed.
    pub fn insert(&mut self, scope: &ScopeKey, object: impl Into<String>, id: impl Into<PersistentId>) {
        self.scopes
            .entry(scope.clone())
            .or_default()
            .push(LiveObject::new(object, id));
    }

    /// Ensure a scope exists even with no objects.
    pub fn add_scope(&mut self, scope: &ScopeKey) {
        self.scopes.entry(scope.clone()).or_default();
    }

    pub fn remove_scope(&mut self, scope: &ScopeKey) -> Option<Vec<LiveObject>> {
        self.scopes.remove(scope)
    }

    /// Copy every object of `from` into a new scope `to`, keeping identifiers
    /// as-is (which duplicates them). Object keys are re-rooted under `to`.
    pub fn duplicate_scope(&mut self, from: &ScopeKey, to: &ScopeKey) -> Vec<LiveObject> {
        let prefix = format!("{}/", from);
        let cloned: Vec<LiveObject> = self
            .scopes
            .get(from)
            .map(|objects| {
                objects
                    .iter()
                    .map(|o| {
                        let name = o.object.as_str().strip_prefix(&prefix).unwrap_or(o.object.as_str());
                        LiveObject {
                            object: ObjectKey::scoped(to, name),
                            id: o.id,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.scopes.insert(to.clone(), cloned.clone());
        cloned
    }

    /// Replace the objects of `scope` wholesale.
    pub fn set_objects(&mut self, scope: &ScopeKey, objects: Vec<LiveObject>) {
        self.scopes.insert(scope.clone(), objects);
    }

    pub fn id_of(&self, scope: &ScopeKey, object: &ObjectKey) -> Option<PersistentId> {
        self.scopes
            .get(scope)?
            .iter()
            .find(|o| &o.object == object)
            .map(|o| o.id)
    }
}

impl ObjectGraph for MemoryGraph {
    fn scopes(&self) -> Result<Vec<ScopeKey>> {
        Ok(self.scopes.keys().cloned().collect())
    }

    fn live_objects(&self, scope: &ScopeKey) -> Result<Vec<LiveObject>> {
        Ok(self.scopes.get(scope).cloned().unwrap_or_default())
    }
}

impl ObjectGraphMut for MemoryGraph {
    fn assign(&mut self, scope: &ScopeKey, object: &ObjectKey, id: PersistentId) -> Result<()> {
        let slot = self
            .scopes
            .get_mut(scope)
            .and_then(|objects| objects.iter_mut().find(|o| &o.object == object))
            .ok_or_else(|| RegistryError::ObjectNotFound {
                object: object.to_string(),
            })?;
        slot.id = id;
        Ok(())
    }
}

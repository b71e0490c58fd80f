//! Scoped registry store.
//!
//! Holds, per scope, the set of identifiers registered there, plus a reverse
//! index so global membership checks are O(1). Every mutation is persisted
//! through the [`PersistenceSink`] before it returns; if the write fails the
//! in-memory change is undone.

use crate::id::PersistentId;
use crate::storage::{PersistenceSink, RegistryDocument, FORMAT_VERSION};
use crate::types::ScopeKey;
use crate::{RegistryError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// The durable mapping from scope to registered identifiers.
///
/// Invariant: an identifier appears in at most one scope, and never as
/// [`PersistentId::UNASSIGNED`]. Empty scopes are not kept.
pub struct ScopedRegistry {
    sink: Box<dyn PersistenceSink>,
    entries: BTreeMap<ScopeKey, BTreeSet<PersistentId>>,
    /// id -> owning scope
    index: HashMap<PersistentId, ScopeKey>,
    session_tag: u64,
}

impl std::fmt::Debug for ScopedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedRegistry")
            .field("sink", &self.sink.describe())
            .field("scopes", &self.entries.len())
            .field("registered", &self.index.len())
            .finish()
    }
}

impl ScopedRegistry {
    /// Load the registry from `sink`.
    ///
    /// Hand-edited documents are tolerated: zero values and identifiers that
    /// already appeared under an earlier scope are skipped with a warning.
    /// The cleaned state is written on the next mutation.
    pub fn open(sink: Box<dyn PersistenceSink>) -> Result<Self> {
        let document = sink.load()?;
        let mut registry = Self {
            sink,
            entries: BTreeMap::new(),
            index: HashMap::new(),
            session_tag: rand::random(),
        };

        for (scope, ids) in document.scopes {
            if scope.as_str().trim().is_empty() {
                warn!("Skipping {} identifiers under an empty scope key", ids.len());
                continue;
            }
            for id in ids {
                if !id.is_assigned() {
                    warn!("Skipping unassigned identifier listed under scope '{}'", scope);
                    continue;
                }
                if let Some(existing) = registry.index.get(&id) {
                    warn!(
                        "Identifier {} listed under both '{}' and '{}'; keeping '{}'",
                        id, existing, scope, existing
                    );
                    continue;
                }
                registry.insert_member(&scope, id);
            }
        }

        info!(
            "Loaded identifier registry from {} ({} identifiers in {} scopes)",
            registry.sink.describe(),
            registry.index.len(),
            registry.entries.len()
        );
        Ok(registry)
    }

    /// Token identifying this loaded registry instance.
    ///
    /// A fresh value is drawn on every `open`, so session caches can tell
    /// when the registry they were built against has been replaced.
    pub fn session_tag(&self) -> u64 {
        self.session_tag
    }

    // ========================================
    // Mutations
    // ========================================

    /// Register `id` under `scope`.
    ///
    /// Fails with [`RegistryError::DuplicateIdentifier`] if `id` is registered
    /// anywhere, including `scope` itself.
    pub fn register(&mut self, scope: &ScopeKey, id: PersistentId) -> Result<()> {
        if !id.is_assigned() {
            return Err(RegistryError::InvalidIdentifier {
                value: id.to_string(),
            });
        }
        if let Some(existing) = self.index.get(&id) {
            return Err(RegistryError::DuplicateIdentifier {
                id,
                existing_scope: existing.to_string(),
            });
        }

        self.insert_member(scope, id);
        if let Err(e) = self.persist() {
            self.remove_member(scope, id);
            return Err(e);
        }

        debug!("Registered {} in scope '{}'", id, scope);
        Ok(())
    }

    /// Remove `id` from `scope`. Returns `false` (and writes nothing) if it
    /// was not registered there.
    pub fn unregister(&mut self, scope: &ScopeKey, id: PersistentId) -> Result<bool> {
        if self.index.get(&id) != Some(scope) {
            return Ok(false);
        }

        self.remove_member(scope, id);
        if let Err(e) = self.persist() {
            self.insert_member(scope, id);
            return Err(e);
        }

        debug!("Unregistered {} from scope '{}'", id, scope);
        Ok(true)
    }

    /// Remove `id` from whichever scope holds it.
    pub fn unregister_id(&mut self, id: PersistentId) -> Result<Option<ScopeKey>> {
        let Some(scope) = self.index.get(&id).cloned() else {
            return Ok(None);
        };
        self.unregister(&scope, id)?;
        Ok(Some(scope))
    }

    /// Drop the whole entry for `scope`, returning the identifiers released.
    ///
    /// Released identifiers become free for reuse. Unknown scopes are a no-op.
    pub fn remove_scope(&mut self, scope: &ScopeKey) -> Result<Vec<PersistentId>> {
        let Some(members) = self.entries.remove(scope) else {
            return Ok(Vec::new());
        };
        for id in &members {
            self.index.remove(id);
        }

        if let Err(e) = self.persist() {
            for id in &members {
                self.index.insert(*id, scope.clone());
            }
            self.entries.insert(scope.clone(), members);
            return Err(e);
        }

        info!("Removed scope '{}' ({} identifiers released)", scope, members.len());
        Ok(members.into_iter().collect())
    }

    /// Move every identifier of `from` to `to`, merging if `to` already has
    /// members.
    pub fn rename_scope(&mut self, from: &ScopeKey, to: &ScopeKey) -> Result<()> {
        if from == to {
            return self.require_scope(from);
        }
        let Some(moved) = self.entries.remove(from) else {
            return Err(RegistryError::UnknownScope {
                scope: from.to_string(),
            });
        };
        for id in &moved {
            self.insert_member(to, *id);
        }

        if let Err(e) = self.persist() {
            for id in &moved {
                self.remove_member(to, *id);
                self.index.insert(*id, from.clone());
            }
            self.entries.insert(from.clone(), moved);
            return Err(e);
        }

        info!("Renamed scope '{}' to '{}' ({} identifiers)", from, to, moved.len());
        Ok(())
    }

    /// Move a registered identifier to another scope.
    pub fn relocate(&mut self, id: PersistentId, to: &ScopeKey) -> Result<()> {
        let Some(from) = self.index.get(&id).cloned() else {
            return Err(RegistryError::InvalidIdentifier {
                value: format!("{} is not registered", id),
            });
        };
        if &from == to {
            return Ok(());
        }

        self.remove_member(&from, id);
        self.insert_member(to, id);
        if let Err(e) = self.persist() {
            self.remove_member(to, id);
            self.insert_member(&from, id);
            return Err(e);
        }

        debug!("Moved {} from scope '{}' to '{}'", id, from, to);
        Ok(())
    }

    // ========================================
    // Queries
    // ========================================

    /// Global membership check across all scopes.
    pub fn contains(&self, id: PersistentId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn scope_of(&self, id: PersistentId) -> Option<&ScopeKey> {
        self.index.get(&id)
    }

    pub fn registered_count(&self) -> usize {
        self.index.len()
    }

    /// Every registered identifier, ascending.
    pub fn all_identifiers(&self) -> Vec<PersistentId> {
        let mut ids: Vec<PersistentId> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Identifiers registered under `scope`, ascending. Empty for unknown scopes.
    pub fn identifiers_in_scope(&self, scope: &ScopeKey) -> Vec<PersistentId> {
        self.entries
            .get(scope)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn scopes(&self) -> Vec<ScopeKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn scope_count(&self) -> usize {
        self.entries.len()
    }

    pub fn has_scope(&self, scope: &ScopeKey) -> bool {
        self.entries.contains_key(scope)
    }

    /// Error unless `scope` has at least one registered identifier.
    pub fn require_scope(&self, scope: &ScopeKey) -> Result<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(RegistryError::UnknownScope {
                scope: scope.to_string(),
            })
        }
    }

    /// The persisted form of the current state.
    pub fn document(&self) -> RegistryDocument {
        RegistryDocument {
            version: FORMAT_VERSION,
            scopes: self
                .entries
                .iter()
                .map(|(scope, ids)| (scope.clone(), ids.iter().copied().collect()))
                .collect(),
        }
    }

    /// Write the current state even if nothing changed (e.g. after loading a
    /// document that needed cleaning).
    pub fn flush(&self) -> Result<()> {
        self.persist()
    }

    // ========================================
    // Internals
    // ========================================

    fn persist(&self) -> Result<()> {
        self.sink.save(&self.document())
    }

    fn insert_member(&mut self, scope: &ScopeKey, id: PersistentId) {
        self.entries.entry(scope.clone()).or_default().insert(id);
        self.index.insert(id, scope.clone());
    }

    fn remove_member(&mut self, scope: &ScopeKey, id: PersistentId) {
        if let Some(members) = self.entries.get_mut(scope) {
            members.remove(&id);
            if members.is_empty() {
                self.entries.remove(scope);
            }
        }
        if self.index.get(&id) == Some(scope) {
            self.index.remove(&id);
        }
    }
}

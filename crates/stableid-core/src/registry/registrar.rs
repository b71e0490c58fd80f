//! Per-session tracking of processed objects.
//!
//! Hosts tend to rescan the same objects over and over. The tracker remembers
//! which object already holds which identifier so repeat scans do no work,
//! and it notices when a second object shows up holding a value some other
//! object already claimed this session (copy/paste, duplicated scenes).
//!
//! Nothing here is persisted. Decisions are only meaningful relative to one
//! loaded registry, so the table is dropped whenever that registry changes.

use crate::id::PersistentId;
use crate::types::ObjectKey;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SessionTracker {
    bound_tag: Option<u64>,
    /// object -> identifier it held when processed
    processed: HashMap<ObjectKey, PersistentId>,
    /// identifier -> first object seen holding it
    claims: HashMap<PersistentId, ObjectKey>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate the tracker with a registry instance, clearing all state if
    /// it was built against a different one.
    pub fn bind(&mut self, session_tag: u64) {
        if self.bound_tag != Some(session_tag) {
            if self.bound_tag.is_some() {
                debug!("Active registry changed; clearing session tracking");
            }
            self.clear_tracking_data();
            self.bound_tag = Some(session_tag);
        }
    }

    /// Whether `object`, currently holding `current`, needs a fresh identifier.
    ///
    /// True for unassigned objects, and for objects not yet processed with
    /// `current` whose value is already claimed by a different object this
    /// session. Otherwise the claim is recorded and later calls are free.
    pub fn should_allocate(&mut self, object: &ObjectKey, current: PersistentId) -> bool {
        if !current.is_assigned() {
            return true;
        }
        if self.processed.get(object) == Some(&current) {
            return false;
        }

        match self.claims.get(&current) {
            Some(owner) if owner != object => {
                debug!(
                    "{} holds {} already claimed by {} this session",
                    object, current, owner
                );
                true
            }
            _ => {
                self.mark_processed(object.clone(), current);
                false
            }
        }
    }

    /// Record that `object` now holds `id`, releasing its previous claim.
    pub fn mark_processed(&mut self, object: ObjectKey, id: PersistentId) {
        if let Some(previous) = self.processed.get(&object).copied() {
            if previous != id && self.claims.get(&previous) == Some(&object) {
                self.claims.remove(&previous);
            }
        }
        if id.is_assigned() {
            self.claims.entry(id).or_insert_with(|| object.clone());
        }
        self.processed.insert(object, id);
    }

    /// Forget an object entirely (deleted, or about to be reset).
    pub fn forget(&mut self, object: &ObjectKey) {
        if let Some(id) = self.processed.remove(object) {
            if self.claims.get(&id) == Some(object) {
                self.claims.remove(&id);
            }
        }
    }

    /// Drop any claim on `id` (it was unregistered or its scope removed).
    pub fn release_id(&mut self, id: PersistentId) {
        if let Some(owner) = self.claims.remove(&id) {
            if self.processed.get(&owner) == Some(&id) {
                self.processed.remove(&owner);
            }
        }
    }

    pub fn is_processed(&self, object: &ObjectKey) -> bool {
        self.processed.contains_key(object)
    }

    pub fn claimant(&self, id: PersistentId) -> Option<&ObjectKey> {
        self.claims.get(&id)
    }

    pub fn tracked_count(&self) -> usize {
        self.processed.len()
    }

    pub fn clear_tracking_data(&mut self) {
        self.processed.clear();
        self.claims.clear();
    }
}

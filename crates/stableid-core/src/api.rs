//! High-level entry point tying the registry components together.

use crate::config::Settings;
use crate::graph::{ObjectGraph, ObjectGraphMut};
use crate::id::PersistentId;
use crate::registry::{
    IdAllocator, LifecycleCoordinator, RepairPlan, RepairSummary, ScopeResolver, ScopeState,
    ScopedRegistry, SessionTracker, ValidationReport,
};
use crate::scene::SceneDirectory;
use crate::storage::{JsonFileSink, PersistenceSink, SessionLock};
use crate::types::{LiveObject, ObjectKey, Reassignment, ScopeKey};
use crate::Result;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// The identifier registry for one editing session.
///
/// Owns the persisted store, the session tracker, the allocator and the
/// lifecycle coordinator. All mutations go through here so the tracker stays
/// consistent with the store.
///
/// # Example
///
/// ```rust,ignore
/// use stableid_core::{IdRegistry, ScopeKey, Settings};
///
/// let settings = Settings::load("./my-project")?;
/// let mut registry = IdRegistry::open(&settings)?;
///
/// let scene = ScopeKey::new("intro")?;
/// let id = registry.allocate(&scene)?;
/// assert!(registry.is_registered(id));
/// ```
#[derive(Debug)]
pub struct IdRegistry {
    store: ScopedRegistry,
    tracker: SessionTracker,
    allocator: IdAllocator,
    lifecycle: LifecycleCoordinator,
    session_lock: Option<SessionLock>,
}

impl IdRegistry {
    /// Open the project registry described by `settings`.
    ///
    /// Takes the session lock first; fails with
    /// [`RegistryError::Locked`](crate::RegistryError::Locked) if another
    /// session has the registry open.
    pub fn open(settings: &Settings) -> Result<Self> {
        let lock = SessionLock::acquire(settings.lock_file())?;
        let sink = JsonFileSink::new(settings.registry_file()).with_backup(settings.keep_backup);
        let scenes = SceneDirectory::from_settings(settings);
        let mut registry = Self::with_sink(Box::new(sink), settings.max_allocation_attempts)?
            .with_resolver(Box::new(scenes.resolver()));
        registry.session_lock = Some(lock);
        Ok(registry)
    }

    /// Open a registry on an arbitrary sink, without locking.
    pub fn with_sink(sink: Box<dyn PersistenceSink>, max_allocation_attempts: u32) -> Result<Self> {
        let store = ScopedRegistry::open(sink)?;
        let mut tracker = SessionTracker::new();
        tracker.bind(store.session_tag());
        Ok(Self {
            store,
            tracker,
            allocator: IdAllocator::new(max_allocation_attempts),
            lifecycle: LifecycleCoordinator::default(),
            session_lock: None,
        })
    }

    /// Use `resolver` to map container keys in lifecycle events to scopes.
    pub fn with_resolver(mut self, resolver: Box<dyn ScopeResolver>) -> Self {
        self.lifecycle = LifecycleCoordinator::new(resolver);
        self
    }

    /// Replace the active store, returning the previous one. Session
    /// tracking is discarded since it was built against the old store.
    pub fn swap_registry(&mut self, store: ScopedRegistry) -> ScopedRegistry {
        let previous = std::mem::replace(&mut self.store, store);
        self.tracker.clear_tracking_data();
        self.tracker.bind(self.store.session_tag());
        info!("Switched active identifier registry");
        previous
    }

    pub fn store(&self) -> &ScopedRegistry {
        &self.store
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Whether this instance holds the project's session lock.
    pub fn holds_lock(&self) -> bool {
        self.session_lock.is_some()
    }

    // ========================================
    // Queries
    // ========================================

    pub fn registered_count(&self) -> usize {
        self.store.registered_count()
    }

    pub fn all_identifiers(&self) -> Vec<PersistentId> {
        self.store.all_identifiers()
    }

    pub fn identifiers_in_scope(&self, scope: &ScopeKey) -> Vec<PersistentId> {
        self.store.identifiers_in_scope(scope)
    }

    pub fn is_registered(&self, id: PersistentId) -> bool {
        self.store.contains(id)
    }

    pub fn scope_of(&self, id: PersistentId) -> Option<&ScopeKey> {
        self.store.scope_of(id)
    }

    pub fn scopes(&self) -> Vec<ScopeKey> {
        self.store.scopes()
    }

    pub fn scope_state(&self, scope: &ScopeKey) -> ScopeState {
        self.lifecycle.scope_state(&self.store, scope)
    }

    // ========================================
    // Mutations
    // ========================================

    /// Allocate and register a fresh identifier in `scope`.
    pub fn allocate(&mut self, scope: &ScopeKey) -> Result<PersistentId> {
        self.allocator.allocate(&mut self.store, scope)
    }

    /// Register an externally chosen identifier.
    pub fn register(&mut self, scope: &ScopeKey, id: PersistentId) -> Result<()> {
        self.store.register(scope, id)
    }

    /// Give `object` a new identifier in `scope`, retiring `current`.
    ///
    /// The new value is allocated before the old one is unregistered, so a
    /// failure part-way never leaves the object's value untracked.
    pub fn regenerate(
        &mut self,
        object: &ObjectKey,
        current: PersistentId,
        scope: &ScopeKey,
    ) -> Result<PersistentId> {
        self.bind_tracker();
        let fresh = self.allocator.allocate(&mut self.store, scope)?;
        if current.is_assigned() {
            // Only retire the value if this object is its known holder
            let claimed_elsewhere = matches!(self.tracker.claimant(current), Some(owner) if owner != object);
            if !claimed_elsewhere {
                self.store.unregister_id(current)?;
            }
        }
        self.tracker.mark_processed(object.clone(), fresh);
        debug!("Regenerated {}: {} -> {}", object, current, fresh);
        Ok(fresh)
    }

    /// Rewrite the registry file from the in-memory state.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Stop tracking `id` wherever it is registered.
    pub fn unregister_id(&mut self, id: PersistentId) -> Result<Option<ScopeKey>> {
        let scope = self.store.unregister_id(id)?;
        if scope.is_some() {
            self.tracker.release_id(id);
        }
        Ok(scope)
    }

    pub fn remove_scope(&mut self, scope: &ScopeKey) -> Result<Vec<PersistentId>> {
        let released = self.store.remove_scope(scope)?;
        for id in &released {
            self.tracker.release_id(*id);
        }
        Ok(released)
    }

    pub fn rename_scope(&mut self, from: &ScopeKey, to: &ScopeKey) -> Result<()> {
        self.store.rename_scope(from, to)?;
        self.tracker.clear_tracking_data();
        Ok(())
    }

    /// Make sure `object` (in `scope`, currently holding `current`) has a
    /// usable identifier, and return it.
    ///
    /// Allocates when the object is unassigned, when another object already
    /// claimed its value this session, or when the value is registered to a
    /// different scope. A value nobody has registered is adopted into `scope`.
    pub fn ensure_assigned(
        &mut self,
        object: &ObjectKey,
        current: PersistentId,
        scope: &ScopeKey,
    ) -> Result<PersistentId> {
        self.bind_tracker();

        let duplicate = self.tracker.should_allocate(object, current);
        let foreign = current.is_assigned()
            && matches!(self.store.scope_of(current), Some(owner) if owner != scope);

        if !duplicate && !foreign {
            if current.is_assigned() && !self.store.contains(current) {
                self.store.register(scope, current)?;
                debug!("Adopted unregistered {} held by {}", current, object);
            }
            return Ok(current);
        }

        let fresh = self.allocator.allocate(&mut self.store, scope)?;
        self.tracker.mark_processed(object.clone(), fresh);
        if current.is_assigned() {
            info!(
                "{} held {} which belongs elsewhere; reassigned {}",
                object, current, fresh
            );
        }
        Ok(fresh)
    }

    /// Run [`ensure_assigned`](Self::ensure_assigned) over every live object
    /// and write changed identifiers back to the graph.
    pub fn assign_pass(&mut self, graph: &mut dyn ObjectGraphMut) -> Result<Vec<Reassignment>> {
        let mut changes = Vec::new();
        for scope in graph.scopes()? {
            for LiveObject { object, id } in graph.live_objects(&scope)? {
                let assigned = self.ensure_assigned(&object, id, &scope)?;
                if assigned != id {
                    if let Err(e) = graph.assign(&scope, &object, assigned) {
                        // Nothing holds the fresh value; don't leave it registered
                        self.tracker.forget(&object);
                        if let Err(undo) = self.store.unregister(&scope, assigned) {
                            warn!("Could not release {} after failed write: {}", assigned, undo);
                        }
                        return Err(e);
                    }
                    changes.push(Reassignment {
                        scope: scope.clone(),
                        object,
                        previous: id,
                        assigned,
                    });
                }
            }
        }
        if !changes.is_empty() {
            info!("Assignment pass updated {} objects", changes.len());
        }
        Ok(changes)
    }

    /// Compare the registry against `graph`. Read-only.
    pub fn validate_registry(&self, graph: &dyn ObjectGraph) -> Result<ValidationReport> {
        self.store.validate(graph)
    }

    /// Apply an explicitly chosen set of fixes from a validation report.
    pub fn repair(
        &mut self,
        graph: &mut dyn ObjectGraphMut,
        report: &ValidationReport,
        plan: &RepairPlan,
    ) -> Result<RepairSummary> {
        let summary = self.store.repair(graph, &self.allocator, report, plan)?;
        // Reassigned objects and dropped orphans invalidate earlier decisions
        self.tracker.clear_tracking_data();
        Ok(summary)
    }

    // ========================================
    // Container lifecycle
    // ========================================

    pub fn container_deleted(&mut self, container: &str) -> Result<Vec<PersistentId>> {
        self.lifecycle
            .on_container_deleted(&mut self.store, &mut self.tracker, container)
    }

    pub fn container_duplicated(
        &mut self,
        old_container: &str,
        new_container: &str,
        cloned: &mut [LiveObject],
    ) -> Result<Vec<Reassignment>> {
        self.bind_tracker();
        self.lifecycle.on_container_duplicated(
            &mut self.store,
            &mut self.tracker,
            &self.allocator,
            old_container,
            new_container,
            cloned,
        )
    }

    /// Copy scene `from` to `to` in `scenes`, giving every copied object a
    /// fresh identifier.
    ///
    /// The copy is only written once its identifiers are reissued. If
    /// anything fails, identifiers allocated for it are released again.
    pub fn duplicate_scene(
        &mut self,
        scenes: &SceneDirectory,
        from: &ScopeKey,
        to: &ScopeKey,
    ) -> Result<Vec<Reassignment>> {
        let before: HashSet<PersistentId> = self.identifiers_in_scope(to).into_iter().collect();

        let mut reassigned = Vec::new();
        let result = scenes.duplicate_scene(from, to, |cloned| {
            reassigned = self.container_duplicated(from.as_str(), to.as_str(), cloned)?;
            Ok(())
        });

        if let Err(e) = result {
            for id in self.identifiers_in_scope(to) {
                if before.contains(&id) {
                    continue;
                }
                self.tracker.release_id(id);
                if let Err(undo) = self.store.unregister(to, id) {
                    warn!("Could not release {} after failed duplication: {}", id, undo);
                }
            }
            return Err(e);
        }
        Ok(reassigned)
    }

    pub fn container_renamed(&mut self, old_container: &str, new_container: &str) -> Result<()> {
        self.lifecycle.on_container_renamed(
            &mut self.store,
            &mut self.tracker,
            old_container,
            new_container,
        )
    }

    fn bind_tracker(&mut self) {
        self.tracker.bind(self.store.session_tag());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use crate::storage::MemorySink;
    use crate::RegistryError;

    fn scope(name: &str) -> ScopeKey {
        ScopeKey::new(name).unwrap()
    }

    fn registry() -> IdRegistry {
        IdRegistry::with_sink(Box::new(MemorySink::new()), 1000).unwrap()
    }

    #[test]
    fn test_allocate_remove_reallocate() {
        let mut registry = registry();
        let a = scope("sceneA");

        let v1 = registry.allocate(&a).unwrap();
        let v2 = registry.allocate(&a).unwrap();
        assert!(v1.is_assigned() && v2.is_assigned());
        assert_ne!(v1, v2);

        registry.remove_scope(&a).unwrap();
        assert_eq!(registry.registered_count(), 0);

        let v3 = registry.allocate(&a).unwrap();
        assert!(registry.is_registered(v3));
    }

    #[test]
    fn test_duplicate_register_scenario() {
        let mut registry = registry();
        registry.register(&scope("sceneA"), PersistentId::new(42)).unwrap();
        let err = registry
            .register(&scope("sceneB"), PersistentId::new(42))
            .unwrap_err();

        assert!(matches!(err, RegistryError::DuplicateIdentifier { .. }));
        assert_eq!(registry.registered_count(), 1);
    }

    #[test]
    fn test_regenerate_replaces_value() {
        let mut registry = registry();
        let a = scope("a");
        let object = ObjectKey::new("a/door");

        let first = registry.ensure_assigned(&object, PersistentId::UNASSIGNED, &a).unwrap();
        let second = registry.regenerate(&object, first, &a).unwrap();

        assert_ne!(first, second);
        assert!(!registry.is_registered(first));
        assert!(registry.is_registered(second));
        assert_eq!(registry.tracker().claimant(second), Some(&object));
    }

    #[test]
    fn test_regenerate_unassigned_object() {
        let mut registry = registry();
        let id = registry
            .regenerate(&ObjectKey::new("a/x"), PersistentId::UNASSIGNED, &scope("a"))
            .unwrap();
        assert_eq!(registry.identifiers_in_scope(&scope("a")), vec![id]);
    }

    #[test]
    fn test_ensure_assigned_is_stable_across_rescans() {
        let mut registry = registry();
        let a = scope("a");
        let object = ObjectKey::new("a/door");

        let id = registry.ensure_assigned(&object, PersistentId::UNASSIGNED, &a).unwrap();
        for _ in 0..3 {
            assert_eq!(registry.ensure_assigned(&object, id, &a).unwrap(), id);
        }
        assert_eq!(registry.registered_count(), 1);
    }

    #[test]
    fn test_ensure_assigned_adopts_unregistered_value() {
        let mut registry = registry();
        let id = registry
            .ensure_assigned(&ObjectKey::new("a/door"), PersistentId::new(77), &scope("a"))
            .unwrap();

        assert_eq!(id, PersistentId::new(77));
        assert_eq!(registry.scope_of(id), Some(&scope("a")));
    }

    #[test]
    fn test_ensure_assigned_reissues_copy_paste_duplicate() {
        let mut registry = registry();
        let a = scope("a");

        let original = registry
            .ensure_assigned(&ObjectKey::new("a/door"), PersistentId::UNASSIGNED, &a)
            .unwrap();
        let copy = registry
            .ensure_assigned(&ObjectKey::new("a/door (1)"), original, &a)
            .unwrap();

        assert_ne!(copy, original);
        assert_eq!(registry.registered_count(), 2);
    }

    #[test]
    fn test_registered_scope_wins_over_processing_order() {
        let mut registry = registry();
        registry.register(&scope("a"), PersistentId::new(5)).unwrap();

        // The clone in "b" is scanned before the original in "a"
        let clone = registry
            .ensure_assigned(&ObjectKey::new("b/door"), PersistentId::new(5), &scope("b"))
            .unwrap();
        let original = registry
            .ensure_assigned(&ObjectKey::new("a/door"), PersistentId::new(5), &scope("a"))
            .unwrap();

        assert_ne!(clone, PersistentId::new(5));
        assert_eq!(original, PersistentId::new(5));
    }

    #[test]
    fn test_assign_pass_writes_back() {
        let mut registry = registry();
        let mut graph = MemoryGraph::new();
        graph.insert(&scope("a"), "a/one", 0u32);
        graph.insert(&scope("a"), "a/two", 0u32);
        graph.insert(&scope("b"), "b/three", 0u32);

        let changes = registry.assign_pass(&mut graph).unwrap();
        assert_eq!(changes.len(), 3);
        assert!(registry.validate_registry(&graph).unwrap().is_clean());

        // Second pass is a no-op
        assert!(registry.assign_pass(&mut graph).unwrap().is_empty());
    }

    #[test]
    fn test_container_duplication_through_facade() {
        let mut registry = registry();
        let mut graph = MemoryGraph::new();
        for name in ["a/x", "a/y", "a/z"] {
            graph.insert(&scope("a"), name, 0u32);
        }
        registry.assign_pass(&mut graph).unwrap();

        let mut cloned = graph.duplicate_scope(&scope("a"), &scope("b"));
        let reassigned = registry.container_duplicated("a", "b", &mut cloned).unwrap();
        graph.set_objects(&scope("b"), cloned);

        assert_eq!(reassigned.len(), 3);
        assert!(registry.validate_registry(&graph).unwrap().is_clean());
        assert_eq!(registry.registered_count(), 6);
    }

    #[test]
    fn test_container_deleted_marks_removed() {
        let mut registry = registry();
        registry.allocate(&scope("a")).unwrap();

        registry.container_deleted("a").unwrap();
        assert_eq!(registry.scope_state(&scope("a")), ScopeState::Removed);
        assert_eq!(registry.registered_count(), 0);
    }

    /// Lists objects but refuses every write.
    struct ReadOnlyGraph(MemoryGraph);

    impl ObjectGraph for ReadOnlyGraph {
        fn scopes(&self) -> Result<Vec<ScopeKey>> {
            self.0.scopes()
        }

        fn live_objects(&self, scope: &ScopeKey) -> Result<Vec<LiveObject>> {
            self.0.live_objects(scope)
        }
    }

    impl ObjectGraphMut for ReadOnlyGraph {
        fn assign(&mut self, _: &ScopeKey, object: &ObjectKey, _: PersistentId) -> Result<()> {
            Err(RegistryError::ObjectNotFound {
                object: object.to_string(),
            })
        }
    }

    #[test]
    fn test_failed_write_back_releases_identifier() {
        let mut registry = registry();
        let mut inner = MemoryGraph::new();
        inner.insert(&scope("a"), "a/door", 0u32);
        let mut graph = ReadOnlyGraph(inner);

        let err = registry.assign_pass(&mut graph).unwrap_err();

        assert!(matches!(err, RegistryError::ObjectNotFound { .. }));
        assert_eq!(registry.registered_count(), 0);
        assert!(!registry.tracker().is_processed(&ObjectKey::new("a/door")));
    }

    #[test]
    fn test_duplicate_scene_through_facade() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut scenes = SceneDirectory::new(temp.path());
        scenes
            .write_scene(
                &scope("a"),
                &crate::scene::SceneFile {
                    objects: vec![
                        crate::scene::SceneObject::new("x"),
                        crate::scene::SceneObject::new("y"),
                    ],
                    ..Default::default()
                },
            )
            .unwrap();
        let mut registry = registry();
        registry.assign_pass(&mut scenes).unwrap();

        let reassigned = registry
            .duplicate_scene(&scenes, &scope("a"), &scope("b"))
            .unwrap();

        assert_eq!(reassigned.len(), 2);
        assert_eq!(registry.registered_count(), 4);
        assert!(registry.validate_registry(&scenes).unwrap().is_clean());
    }

    #[test]
    fn test_failed_duplicate_scene_releases_identifiers() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut scenes = SceneDirectory::new(temp.path());
        scenes
            .write_scene(
                &scope("a"),
                &crate::scene::SceneFile {
                    objects: vec![crate::scene::SceneObject::new("x")],
                    ..Default::default()
                },
            )
            .unwrap();
        let mut registry = registry();
        registry.assign_pass(&mut scenes).unwrap();

        // A plain file where the copy's directory would go makes the write fail
        std::fs::write(temp.path().join("blocked"), "").unwrap();
        let result = registry.duplicate_scene(&scenes, &scope("a"), &scope("blocked/b"));

        assert!(result.is_err());
        assert_eq!(registry.registered_count(), 1);
        assert!(registry.identifiers_in_scope(&scope("blocked/b")).is_empty());
        assert_eq!(registry.tracker().tracked_count(), 1);
    }

    #[test]
    fn test_swap_registry_clears_tracking() {
        let mut registry = registry();
        registry
            .ensure_assigned(&ObjectKey::new("a/x"), PersistentId::UNASSIGNED, &scope("a"))
            .unwrap();
        assert_eq!(registry.tracker().tracked_count(), 1);

        let replacement = ScopedRegistry::open(Box::new(MemorySink::new())).unwrap();
        let previous = registry.swap_registry(replacement);

        assert_eq!(previous.registered_count(), 1);
        assert_eq!(registry.registered_count(), 0);
        assert_eq!(registry.tracker().tracked_count(), 0);
    }
}

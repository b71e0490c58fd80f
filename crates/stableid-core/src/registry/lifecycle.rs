//! Container lifecycle handling.
//!
//! The host tells us when a container (scene) is deleted, duplicated or
//! renamed; the coordinator keeps the registry in step. A deletion the host
//! never reports (file removed while no session was open) is left for
//! validation to surface as orphaned identifiers.

use super::allocator::IdAllocator;
use super::registrar::SessionTracker;
use super::store::ScopedRegistry;
use crate::id::PersistentId;
use crate::types::{LiveObject, Reassignment, ScopeKey};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Maps a host container key to the scope it is tracked under.
pub trait ScopeResolver: Send {
    fn resolve(&self, container: &str) -> Result<ScopeKey>;
}

/// Container keys are scope keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl ScopeResolver for IdentityResolver {
    fn resolve(&self, container: &str) -> Result<ScopeKey> {
        ScopeKey::new(container)
    }
}

/// Container keys are file paths under `root`; the scope is the relative
/// path with `extension` stripped (`<root>/levels/intro.scene.json` ->
/// `levels/intro`). Relative container keys are taken as relative to `root`.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    canonical_root: Option<PathBuf>,
    extension: String,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        let root = root.into();
        let canonical_root = root.canonicalize().ok();
        Self {
            root,
            canonical_root,
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` names a file this resolver handles.
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| n.to_string_lossy().ends_with(&format!(".{}", self.extension)))
            .unwrap_or(false)
    }

    /// Inverse of `resolve`: where the container for `scope` lives.
    pub fn container_path(&self, scope: &ScopeKey) -> PathBuf {
        self.root.join(format!("{}.{}", scope, self.extension))
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        if let Ok(rel) = path.strip_prefix(&self.root) {
            return rel;
        }
        if let Some(canonical) = &self.canonical_root {
            if let Ok(rel) = path.strip_prefix(canonical) {
                return rel;
            }
        }
        path
    }
}

impl ScopeResolver for PathResolver {
    fn resolve(&self, container: &str) -> Result<ScopeKey> {
        let relative = self.relative(Path::new(container));
        let joined = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        let suffix = format!(".{}", self.extension);
        let key = joined.strip_suffix(&suffix).unwrap_or(&joined);
        ScopeKey::new(key)
    }
}

/// Where a scope is in its lifecycle, as far as this session knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeState {
    /// Has registered identifiers.
    Active,
    /// Deleted during this session.
    Removed,
    /// Never seen.
    Unknown,
}

pub struct LifecycleCoordinator {
    resolver: Box<dyn ScopeResolver>,
    removed: HashSet<ScopeKey>,
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new(Box::new(IdentityResolver))
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("removed", &self.removed)
            .finish_non_exhaustive()
    }
}

impl LifecycleCoordinator {
    pub fn new(resolver: Box<dyn ScopeResolver>) -> Self {
        Self {
            resolver,
            removed: HashSet::new(),
        }
    }

    pub fn resolve(&self, container: &str) -> Result<ScopeKey> {
        self.resolver.resolve(container)
    }

    /// The container is gone: stop tracking its identifiers.
    ///
    /// Returns the identifiers released for reuse. Deleting an unknown or
    /// already removed container is a no-op.
    pub fn on_container_deleted(
        &mut self,
        registry: &mut ScopedRegistry,
        tracker: &mut SessionTracker,
        container: &str,
    ) -> Result<Vec<PersistentId>> {
        let scope = self.resolver.resolve(container)?;
        let released = registry.remove_scope(&scope)?;
        for id in &released {
            tracker.release_id(*id);
        }
        self.removed.insert(scope.clone());

        info!(
            "Container '{}' deleted; scope '{}' removed ({} identifiers released)",
            container,
            scope,
            released.len()
        );
        Ok(released)
    }

    /// The container was cloned into `new_container`.
    ///
    /// Every identifier in the clone duplicates one in the original, so the
    /// tracker forgets each clone and every one of them is given a fresh value
    /// in the new scope, whatever it held. `cloned` is updated in place.
    pub fn on_container_duplicated(
        &mut self,
        registry: &mut ScopedRegistry,
        tracker: &mut SessionTracker,
        allocator: &IdAllocator,
        old_container: &str,
        new_container: &str,
        cloned: &mut [LiveObject],
    ) -> Result<Vec<Reassignment>> {
        let old_scope = self.resolver.resolve(old_container)?;
        let new_scope = self.resolver.resolve(new_container)?;

        let previous: Vec<PersistentId> = cloned.iter().map(|o| o.id).collect();
        for object in cloned.iter_mut() {
            tracker.forget(&object.object);
            object.id = PersistentId::UNASSIGNED;
        }

        let mut reassigned = Vec::with_capacity(cloned.len());
        for (object, previous) in cloned.iter_mut().zip(previous) {
            let fresh = allocator.allocate(registry, &new_scope)?;
            object.id = fresh;
            tracker.mark_processed(object.object.clone(), fresh);
            reassigned.push(Reassignment {
                scope: new_scope.clone(),
                object: object.object.clone(),
                previous,
                assigned: fresh,
            });
        }
        self.removed.remove(&new_scope);

        info!(
            "Container '{}' duplicated from scope '{}' into '{}' ({} identifiers reissued)",
            new_container,
            old_scope,
            new_scope,
            reassigned.len()
        );
        Ok(reassigned)
    }

    /// The container was renamed; its identifiers follow it.
    pub fn on_container_renamed(
        &mut self,
        registry: &mut ScopedRegistry,
        tracker: &mut SessionTracker,
        old_container: &str,
        new_container: &str,
    ) -> Result<()> {
        let from = self.resolver.resolve(old_container)?;
        let to = self.resolver.resolve(new_container)?;
        if !registry.has_scope(&from) {
            debug!("Rename of untracked container '{}' ignored", old_container);
            return Ok(());
        }
        registry.rename_scope(&from, &to)?;
        // Object keys embed the container name
        tracker.clear_tracking_data();
        self.removed.insert(from);
        self.removed.remove(&to);
        Ok(())
    }

    pub fn scope_state(&self, registry: &ScopedRegistry, scope: &ScopeKey) -> ScopeState {
        if registry.has_scope(scope) {
            ScopeState::Active
        } else if self.removed.contains(scope) {
            ScopeState::Removed
        } else {
            ScopeState::Unknown
        }
    }
}

//! A directory of scene files acting as the object host.
//!
//! Each `<name>.scene.json` is one container. Its objects carry a `name`
//! and an `id`; any other fields are preserved untouched when identifiers
//! are written back. Objects are keyed by name, with repeated names told
//! apart by their position.

use crate::config::{RegistryConfig, Settings};
use crate::graph::{ObjectGraph, ObjectGraphMut};
use crate::id::PersistentId;
use crate::registry::{PathResolver, ScopeResolver};
use crate::storage::{atomic_read_json, atomic_write_json};
use crate::types::{LiveObject, ObjectKey, ScopeKey};
use crate::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One object inside a scene file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(default)]
    pub id: PersistentId,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: PersistentId::UNASSIGNED,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<PersistentId>) -> Self {
        self.id = id.into();
        self
    }
}

/// Contents of a `.scene.json` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub objects: Vec<SceneObject>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Scene files under one root directory.
#[derive(Debug, Clone)]
pub struct SceneDirectory {
    resolver: PathResolver,
}

impl SceneDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            resolver: PathResolver::new(root, RegistryConfig::SCENE_EXTENSION),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.scenes_path())
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    /// Resolver mapping scene paths to scope keys, for the lifecycle
    /// coordinator.
    pub fn resolver(&self) -> PathResolver {
        self.resolver.clone()
    }

    pub fn scene_path(&self, scope: &ScopeKey) -> PathBuf {
        self.resolver.container_path(scope)
    }

    pub fn is_scene_path(&self, path: &Path) -> bool {
        self.resolver.matches(path)
    }

    pub fn scope_for_path(&self, path: &Path) -> Result<ScopeKey> {
        self.resolver.resolve(&path.to_string_lossy())
    }

    pub fn exists(&self, scope: &ScopeKey) -> bool {
        self.scene_path(scope).is_file()
    }

    pub fn read_scene(&self, scope: &ScopeKey) -> Result<SceneFile> {
        atomic_read_json(&self.scene_path(scope))?.ok_or_else(|| RegistryError::UnknownScope {
            scope: scope.to_string(),
        })
    }

    pub fn write_scene(&self, scope: &ScopeKey, scene: &SceneFile) -> Result<()> {
        atomic_write_json(&self.scene_path(scope), scene, false)
    }

    /// Copy scene `from` to a new scene `to`.
    ///
    /// `reissue` receives the cloned objects, keyed under `to` and still
    /// carrying the original identifiers, and must replace them. The new
    /// file is only written once it succeeds, so a failed duplication never
    /// leaves a copy holding the original values on disk.
    pub fn duplicate_scene<F>(
        &self,
        from: &ScopeKey,
        to: &ScopeKey,
        reissue: F,
    ) -> Result<Vec<LiveObject>>
    where
        F: FnOnce(&mut [LiveObject]) -> Result<()>,
    {
        if self.exists(to) {
            return Err(RegistryError::Other(format!(
                "Scene '{}' already exists",
                to
            )));
        }
        let mut scene = self.read_scene(from)?;
        let mut cloned = to_live_objects(to, &scene);
        reissue(&mut cloned)?;

        apply_ids(to, &mut scene, &cloned)?;
        self.write_scene(to, &scene)?;
        debug!("Duplicated scene '{}' to '{}'", from, to);
        Ok(cloned)
    }

    /// Write a batch of identifiers into one scene with a single file write.
    pub fn assign_many(&self, scope: &ScopeKey, updates: &[LiveObject]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut scene = self.read_scene(scope)?;
        apply_ids(scope, &mut scene, updates)?;
        self.write_scene(scope, &scene)
    }
}

/// Key for every object of `scene`, in file order.
///
/// Names are not required to be unique (copy/paste inside a scene keeps
/// them), so a repeated name gets a `#<n>` suffix: the second `door` is
/// `scope/door#2`. Keys stay stable as long as objects keep their order.
fn object_keys(scope: &ScopeKey, scene: &SceneFile) -> Vec<ObjectKey> {
    let mut used: HashSet<String> = HashSet::with_capacity(scene.objects.len());
    scene
        .objects
        .iter()
        .map(|o| {
            let mut name = o.name.clone();
            let mut n = 2;
            while used.contains(&name) {
                name = format!("{}#{}", o.name, n);
                n += 1;
            }
            used.insert(name.clone());
            ObjectKey::scoped(scope, &name)
        })
        .collect()
}

fn to_live_objects(scope: &ScopeKey, scene: &SceneFile) -> Vec<LiveObject> {
    object_keys(scope, scene)
        .into_iter()
        .zip(&scene.objects)
        .map(|(object, o)| LiveObject { object, id: o.id })
        .collect()
}

fn apply_ids(scope: &ScopeKey, scene: &mut SceneFile, updates: &[LiveObject]) -> Result<()> {
    let keys = object_keys(scope, scene);
    for update in updates {
        let index = keys
            .iter()
            .position(|k| k == &update.object)
            .ok_or_else(|| RegistryError::ObjectNotFound {
                object: update.object.to_string(),
            })?;
        scene.objects[index].id = update.id;
    }
    Ok(())
}

impl ObjectGraph for SceneDirectory {
    fn scopes(&self) -> Result<Vec<ScopeKey>> {
        if !self.root().exists() {
            return Ok(Vec::new());
        }

        let mut scopes = Vec::new();
        for entry in WalkDir::new(self.root()).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable scene entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.is_scene_path(entry.path()) {
                continue;
            }
            match self.scope_for_path(entry.path()) {
                Ok(scope) => scopes.push(scope),
                Err(e) => warn!("Ignoring scene {}: {}", entry.path().display(), e),
            }
        }
        scopes.sort();
        Ok(scopes)
    }

    fn live_objects(&self, scope: &ScopeKey) -> Result<Vec<LiveObject>> {
        match atomic_read_json::<SceneFile>(&self.scene_path(scope))? {
            Some(scene) => Ok(to_live_objects(scope, &scene)),
            None => Ok(Vec::new()),
        }
    }
}

impl ObjectGraphMut for SceneDirectory {
    fn assign(&mut self, scope: &ScopeKey, object: &ObjectKey, id: PersistentId) -> Result<()> {
        self.assign_many(
            scope,
            &[LiveObject {
                object: object.clone(),
                id,
            }],
        )
    }
}

//! StableId Core - persistent identifier registry for editor objects.
//!
//! Hands out 32-bit identifiers that stay unique across every scope (scene)
//! of a project, survive save/load, and are reissued when objects or whole
//! scenes are duplicated. The registry only tracks which values are taken;
//! objects live in a host that implements [`ObjectGraph`].
//!
//! # Example
//!
//! ```rust,ignore
//! use stableid_core::{IdRegistry, ObjectKey, PersistentId, ScopeKey, Settings};
//!
//! fn main() -> stableid_core::Result<()> {
//!     let settings = Settings::load("/path/to/project")?;
//!     let mut registry = IdRegistry::open(&settings)?;
//!
//!     let scene = ScopeKey::new("levels/intro")?;
//!     let door = ObjectKey::scoped(&scene, "door");
//!     let id = registry.ensure_assigned(&door, PersistentId::UNASSIGNED, &scene)?;
//!     println!("door -> {}", id);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod id;
pub mod registry;
pub mod scene;
pub mod storage;
pub mod types;

mod api;

// Re-export commonly used types
pub use api::IdRegistry;
pub use config::{RegistryConfig, Settings};
pub use error::{RegistryError, Result};
pub use graph::{MemoryGraph, ObjectGraph, ObjectGraphMut};
pub use id::PersistentId;
pub use registry::{
    Discrepancy, IdAllocator, IdentityResolver, LifecycleCoordinator, PathResolver, RepairPlan,
    RepairSummary, ScopeResolver, ScopeState, ScopedRegistry, SessionTracker, ValidationReport,
};
pub use scene::{ContainerEvent, SceneDirectory, SceneFile, SceneObject, SceneWatcher};
pub use storage::{JsonFileSink, MemorySink, PersistenceSink, RegistryDocument, SessionLock};
pub use types::{LiveObject, ObjectKey, Reassignment, ScopeKey};

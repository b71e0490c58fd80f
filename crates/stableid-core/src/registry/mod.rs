//! The identifier registry proper.
//!
//! - `store`: scoped, persisted membership with O(1) global lookups
//! - `allocator`: random allocation with bounded collision retry
//! - `registrar`: per-session tracking of processed objects
//! - `lifecycle`: reactions to container deletion/duplication/rename
//! - `validation`: reconciliation against the live object graph

mod allocator;
mod lifecycle;
mod registrar;
mod store;
mod validation;

pub use allocator::IdAllocator;
pub use lifecycle::{
    IdentityResolver, LifecycleCoordinator, PathResolver, ScopeResolver, ScopeState,
};
pub use registrar::SessionTracker;
pub use store::ScopedRegistry;
pub use validation::{Discrepancy, RepairPlan, RepairSummary, ValidationReport};

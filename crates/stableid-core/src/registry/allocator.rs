//! Random identifier allocation with collision retry.
//!
//! Identifiers are drawn uniformly from the non-zero `u32` space rather than
//! from a counter, so scenes edited independently can be merged without a
//! central sequence. Each draw is checked against the whole registry.

use super::store::ScopedRegistry;
use crate::config::RegistryConfig;
use crate::id::PersistentId;
use crate::types::ScopeKey;
use crate::{RegistryError, Result};
use rand::Rng;
use tracing::{debug, trace, warn};

/// Hands out fresh identifiers and reserves them in the registry.
#[derive(Debug, Clone, Copy)]
pub struct IdAllocator {
    max_attempts: u32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            max_attempts: RegistryConfig::MAX_ALLOCATION_ATTEMPTS,
        }
    }
}

impl IdAllocator {
    /// Allocator giving up after `max_attempts` draws (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Allocate a fresh identifier in `scope` using the thread-local RNG.
    pub fn allocate(&self, registry: &mut ScopedRegistry, scope: &ScopeKey) -> Result<PersistentId> {
        self.allocate_with(registry, scope, &mut rand::rng())
    }

    /// Allocate using the supplied random source.
    ///
    /// The returned identifier is already registered and persisted. A zero
    /// draw counts as a failed attempt.
    pub fn allocate_with<R: Rng>(
        &self,
        registry: &mut ScopedRegistry,
        scope: &ScopeKey,
        rng: &mut R,
    ) -> Result<PersistentId> {
        for attempt in 1..=self.max_attempts {
            let candidate = PersistentId::new(rng.random::<u32>());
            if !candidate.is_assigned() {
                continue;
            }
            if registry.contains(candidate) {
                trace!("Allocation attempt {} collided with {}", attempt, candidate);
                continue;
            }

            registry.register(scope, candidate)?;
            debug!(
                "Allocated {} in scope '{}' after {} attempt(s)",
                candidate, scope, attempt
            );
            return Ok(candidate);
        }

        warn!(
            "Identifier allocation for scope '{}' exhausted after {} attempts",
            scope, self.max_attempts
        );
        Err(RegistryError::AllocationExhausted {
            scope: scope.to_string(),
            attempts: self.max_attempts,
        })
    }
}

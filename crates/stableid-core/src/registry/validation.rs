//! Reconciliation between the registry and the live object graph.
//!
//! `validate` only reports. Fixing things is a separate `repair` call driven
//! by an explicit [`RepairPlan`]; duplicates in particular are only resolved
//! for identifiers the caller has picked a keeper for.

use super::allocator::IdAllocator;
use super::store::ScopedRegistry;
use crate::graph::{ObjectGraph, ObjectGraphMut};
use crate::id::PersistentId;
use crate::types::{ObjectKey, Reassignment, ScopeKey};
use crate::{RegistryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// One inconsistency between persisted and live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Discrepancy {
    /// Registered, but no live object holds it.
    #[serde(rename_all = "camelCase")]
    OrphanedIdentifier { scope: ScopeKey, id: PersistentId },

    /// A live object holds a non-zero identifier the registry doesn't know.
    #[serde(rename_all = "camelCase")]
    UnregisteredLiveIdentifier {
        scope: ScopeKey,
        object: ObjectKey,
        id: PersistentId,
    },

    /// Two or more live objects hold the same value.
    #[serde(rename_all = "camelCase")]
    CrossScopeDuplicate {
        id: PersistentId,
        holders: Vec<(ScopeKey, ObjectKey)>,
    },

    /// Registered under a different scope than the one its holder lives in.
    #[serde(rename_all = "camelCase")]
    MisplacedIdentifier {
        id: PersistentId,
        registered_scope: ScopeKey,
        live_scope: ScopeKey,
        object: ObjectKey,
    },
}

impl Discrepancy {
    pub fn id(&self) -> PersistentId {
        match self {
            Discrepancy::OrphanedIdentifier { id, .. }
            | Discrepancy::UnregisteredLiveIdentifier { id, .. }
            | Discrepancy::CrossScopeDuplicate { id, .. }
            | Discrepancy::MisplacedIdentifier { id, .. } => *id,
        }
    }

    /// Duplicates can only be fixed by invalidating a live reference.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Discrepancy::CrossScopeDuplicate { .. })
    }
}

/// Result of one validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub checked_at: DateTime<Utc>,
    pub scopes_scanned: usize,
    pub live_objects: usize,
    pub registered: usize,
    /// Registered scopes the object graph no longer has (missed deletions).
    pub missing_scopes: Vec<ScopeKey>,
    pub discrepancies: Vec<Discrepancy>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn orphan_count(&self) -> usize {
        self.count(|d| matches!(d, Discrepancy::OrphanedIdentifier { .. }))
    }

    pub fn unregistered_count(&self) -> usize {
        self.count(|d| matches!(d, Discrepancy::UnregisteredLiveIdentifier { .. }))
    }

    pub fn duplicate_count(&self) -> usize {
        self.count(|d| matches!(d, Discrepancy::CrossScopeDuplicate { .. }))
    }

    pub fn misplaced_count(&self) -> usize {
        self.count(|d| matches!(d, Discrepancy::MisplacedIdentifier { .. }))
    }

    fn count(&self, pred: impl Fn(&Discrepancy) -> bool) -> usize {
        self.discrepancies.iter().filter(|d| pred(d)).count()
    }
}

/// Which findings a repair may act on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairPlan {
    pub drop_orphans: bool,
    pub register_unregistered: bool,
    pub relocate_misplaced: bool,
    /// For each duplicated identifier, the holder that keeps it. All other
    /// holders are given fresh identifiers.
    #[serde(default)]
    pub keep: BTreeMap<PersistentId, ObjectKey>,
}

impl RepairPlan {
    /// Every non-destructive fix; duplicates untouched.
    pub fn non_destructive() -> Self {
        Self {
            drop_orphans: true,
            register_unregistered: true,
            relocate_misplaced: true,
            keep: BTreeMap::new(),
        }
    }

    pub fn keep(mut self, id: PersistentId, object: ObjectKey) -> Self {
        self.keep.insert(id, object);
        self
    }
}

/// What a repair actually did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairSummary {
    pub orphans_dropped: usize,
    pub registered: usize,
    pub relocated: usize,
    pub reassigned: Vec<Reassignment>,
    pub skipped: usize,
}

impl ScopedRegistry {
    /// Compare the registry against every live object in `graph`.
    ///
    /// Read-only; nothing is fixed.
    pub fn validate(&self, graph: &dyn ObjectGraph) -> Result<ValidationReport> {
        let live_scopes: BTreeSet<ScopeKey> = graph.scopes()?.into_iter().collect();

        // id -> every (scope, object) holding it
        let mut holders: BTreeMap<PersistentId, Vec<(ScopeKey, ObjectKey)>> = BTreeMap::new();
        let mut live_objects = 0;
        for scope in &live_scopes {
            for object in graph.live_objects(scope)? {
                live_objects += 1;
                if object.id.is_assigned() {
                    holders
                        .entry(object.id)
                        .or_default()
                        .push((scope.clone(), object.object));
                }
            }
        }

        let mut discrepancies = Vec::new();

        for (id, holding) in &holders {
            if holding.len() > 1 {
                discrepancies.push(Discrepancy::CrossScopeDuplicate {
                    id: *id,
                    holders: holding.clone(),
                });
                continue;
            }
            let (live_scope, object) = &holding[0];
            match self.scope_of(*id) {
                None => discrepancies.push(Discrepancy::UnregisteredLiveIdentifier {
                    scope: live_scope.clone(),
                    object: object.clone(),
                    id: *id,
                }),
                Some(registered) if registered != live_scope => {
                    discrepancies.push(Discrepancy::MisplacedIdentifier {
                        id: *id,
                        registered_scope: registered.clone(),
                        live_scope: live_scope.clone(),
                        object: object.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        for id in self.all_identifiers() {
            if !holders.contains_key(&id) {
                if let Some(scope) = self.scope_of(id) {
                    discrepancies.push(Discrepancy::OrphanedIdentifier {
                        scope: scope.clone(),
                        id,
                    });
                }
            }
        }

        let missing_scopes: Vec<ScopeKey> = self
            .scopes()
            .into_iter()
            .filter(|s| !live_scopes.contains(s))
            .collect();

        let report = ValidationReport {
            checked_at: Utc::now(),
            scopes_scanned: live_scopes.len(),
            live_objects,
            registered: self.registered_count(),
            missing_scopes,
            discrepancies,
        };

        if report.is_clean() {
            info!(
                "Registry valid: {} identifiers, {} live objects",
                report.registered, report.live_objects
            );
        } else {
            warn!(
                "Registry validation found {} discrepancies ({} orphaned, {} unregistered, {} duplicated, {} misplaced)",
                report.discrepancies.len(),
                report.orphan_count(),
                report.unregistered_count(),
                report.duplicate_count(),
                report.misplaced_count()
            );
        }
        Ok(report)
    }

    /// Apply the fixes `plan` allows to the findings in `report`.
    ///
    /// The report may be stale; every fix re-checks current state and counts
    /// anything no longer applicable as skipped.
    pub fn repair(
        &mut self,
        graph: &mut dyn ObjectGraphMut,
        allocator: &IdAllocator,
        report: &ValidationReport,
        plan: &RepairPlan,
    ) -> Result<RepairSummary> {
        let mut summary = RepairSummary::default();

        for discrepancy in &report.discrepancies {
            match discrepancy {
                Discrepancy::OrphanedIdentifier { scope, id } => {
                    if !plan.drop_orphans {
                        summary.skipped += 1;
                    } else if self.unregister(scope, *id)? {
                        summary.orphans_dropped += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }

                Discrepancy::UnregisteredLiveIdentifier { scope, id, .. } => {
                    if !plan.register_unregistered {
                        summary.skipped += 1;
                        continue;
                    }
                    match self.register(scope, *id) {
                        Ok(()) => summary.registered += 1,
                        Err(RegistryError::DuplicateIdentifier { .. }) => {
                            warn!("{} was registered since validation; skipping", id);
                            summary.skipped += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }

                Discrepancy::MisplacedIdentifier { id, live_scope, .. } => {
                    if plan.relocate_misplaced && self.contains(*id) {
                        self.relocate(*id, live_scope)?;
                        summary.relocated += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }

                Discrepancy::CrossScopeDuplicate { id, holders } => {
                    let Some(keeper) = plan.keep.get(id) else {
                        summary.skipped += 1;
                        continue;
                    };
                    let Some((keeper_scope, _)) = holders.iter().find(|(_, o)| o == keeper) else {
                        warn!("{} is not a holder of {}; duplicate left as-is", keeper, id);
                        summary.skipped += 1;
                        continue;
                    };
                    let others: Vec<&(ScopeKey, ObjectKey)> =
                        holders.iter().filter(|(_, o)| o != keeper).collect();
                    if others.is_empty() {
                        // Holders indistinguishable from the keeper can't be told apart
                        warn!("Every holder of {} is keyed as {}; duplicate left as-is", id, keeper);
                        summary.skipped += 1;
                        continue;
                    }

                    match self.scope_of(*id).cloned() {
                        None => self.register(keeper_scope, *id)?,
                        Some(current) if &current != keeper_scope => {
                            self.relocate(*id, keeper_scope)?
                        }
                        Some(_) => {}
                    }

                    for (scope, object) in others {
                        let fresh = allocator.allocate(self, scope)?;
                        if let Err(e) = graph.assign(scope, object, fresh) {
                            self.unregister(scope, fresh)?;
                            return Err(e);
                        }
                        debug!("Duplicate {} on {} replaced with {}", id, object, fresh);
                        summary.reassigned.push(Reassignment {
                            scope: scope.clone(),
                            object: object.clone(),
                            previous: *id,
                            assigned: fresh,
                        });
                    }
                }
            }
        }

        info!(
            "Repair finished: {} orphans dropped, {} registered, {} relocated, {} reassigned, {} skipped",
            summary.orphans_dropped,
            summary.registered,
            summary.relocated,
            summary.reassigned.len(),
            summary.skipped
        );
        Ok(summary)
    }
}

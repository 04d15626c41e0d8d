//! Resource budget enforcement.
//!
//! [`CadBudget`] turns the culler's ordered wish list into the set of sectors
//! that may be resident, and decides which already-loaded sectors must go to
//! make room. It acts as a priority cache over resident memory: sectors that
//! fell out of the wish list stay loaded for as long as the budget has room.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::culler::CandidateSector;
use crate::metadata::{LevelOfDetail, SectorCost, SectorKey};

/// Resource limits for all streamed CAD geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budget {
    /// Maximum total estimated download size of resident sectors.
    pub geometry_download_size_bytes: u64,
    /// Maximum total estimated draw calls, unlimited when `None`.
    pub maximum_draw_calls: Option<u64>,
}

impl Budget {
    /// 35 MiB and 2000 draw calls.
    pub const DEFAULT: Self = Self {
        geometry_download_size_bytes: 35 * 1024 * 1024,
        maximum_draw_calls: Some(2000),
    };

    pub const UNLIMITED: Self = Self {
        geometry_download_size_bytes: u64::MAX,
        maximum_draw_calls: None,
    };

    /// Whether `cost` stays within both limits.
    #[inline]
    #[must_use]
    pub fn fits(&self, cost: SectorCost) -> bool {
        cost.download_size <= self.geometry_download_size_bytes
            && self
                .maximum_draw_calls
                .is_none_or(|limit| cost.draw_calls <= limit)
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A sector currently holding geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidentSector {
    pub key: SectorKey,
    pub lod: LevelOfDetail,
    pub cost: SectorCost,
}

/// Totals of one budget pass, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetSpent {
    /// Cost of accepted plus retained sectors, counting the larger of the two
    /// levels for sectors that are changing level.
    pub cost: SectorCost,
    pub accepted: usize,
    /// Candidates that did not make it into the accepted set.
    pub dropped: usize,
    /// Loaded sectors kept resident although not accepted.
    pub retained: usize,
    pub evicted: usize,
}

/// Output of [`CadBudget::filter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetDecision {
    /// Sectors that should be resident, in candidate order.
    pub accepted: Vec<CandidateSector>,
    /// Loaded sectors whose geometry must be released.
    pub evict: Vec<SectorKey>,
    pub spent: BudgetSpent,
}

/// Greedy budget filter with lowest-priority-first eviction.
#[derive(Debug, Clone, Default)]
pub struct CadBudget {
    budget: Budget,
}

impl CadBudget {
    #[must_use]
    pub fn new(budget: Budget) -> Self {
        Self { budget }
    }

    #[must_use]
    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn set_budget(&mut self, budget: Budget) {
        self.budget = budget;
    }

    /// Accept candidates in order while they fit and pick evictions among
    /// `resident` sectors.
    ///
    /// The first candidate is always accepted, even on its own over budget,
    /// so the result never exceeds the budget by more than one sector. The
    /// pass stops at the first candidate that does not fit.
    #[must_use]
    pub fn filter(
        &self,
        candidates: &[CandidateSector],
        resident: &[ResidentSector],
    ) -> BudgetDecision {
        let mut accepted = Vec::new();
        let mut total = SectorCost::ZERO;
        for candidate in candidates {
            let next = total + candidate.cost;
            if !accepted.is_empty() && !self.budget.fits(next) {
                break;
            }
            accepted.push(*candidate);
            total = next;
        }

        let wanted: HashMap<SectorKey, &CandidateSector> =
            accepted.iter().map(|c| (c.key(), c)).collect();
        let priorities: HashMap<SectorKey, f64> =
            candidates.iter().map(|c| (c.key(), c.priority)).collect();

        // Sectors changing level keep their current geometry as a fallback
        // until the new level arrives.
        let mut fallback = SectorCost::ZERO;
        for sector in resident {
            let Some(wanted) = wanted.get(&sector.key) else {
                continue;
            };
            if wanted.lod != sector.lod {
                fallback += sector.cost.saturating_sub(wanted.cost);
            }
        }
        let held = total + fallback;

        let mut retained: Vec<(f64, &ResidentSector)> = resident
            .iter()
            .filter(|r| !wanted.contains_key(&r.key))
            .map(|r| (priorities.get(&r.key).copied().unwrap_or(0.0), r))
            .collect();
        // Lowest priority first, larger keys first among equals.
        retained.sort_by(|(pa, a), (pb, b)| {
            pa.total_cmp(pb).then_with(|| b.key.cmp(&a.key))
        });

        let mut retained_cost: SectorCost = retained.iter().map(|(_, r)| r.cost).sum();
        let mut evict = Vec::new();
        for (_, sector) in &retained {
            if self.budget.fits(held + retained_cost) {
                break;
            }
            retained_cost = retained_cost.saturating_sub(sector.cost);
            evict.push(sector.key);
        }

        let spent = BudgetSpent {
            cost: held + retained_cost,
            accepted: accepted.len(),
            dropped: candidates.len() - accepted.len(),
            retained: retained.len() - evict.len(),
            evicted: evict.len(),
        };
        tracing::debug!(
            "Budget pass: {} accepted, {} dropped, {} retained, {} evicted, {} bytes / {} draw calls",
            spent.accepted,
            spent.dropped,
            spent.retained,
            spent.evicted,
            spent.cost.download_size,
            spent.cost.draw_calls
        );

        BudgetDecision {
            accepted,
            evict,
            spent,
        }
    }
}

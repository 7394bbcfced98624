//! Per-address branch observations

use std::collections::{BTreeMap, BTreeSet};

use dbt_core::GuestAddr;

/// Probability reported for sites that were never executed
pub const UNKNOWN_PROBABILITY: f32 = -1.0;

/// Observed targets of one branch instruction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSite {
    /// How often the branch instruction was profiled
    pub(crate) execution_count: u64,
    /// Target address -> times branched to it
    pub(crate) targets: BTreeMap<GuestAddr, u64>,
}

impl BranchSite {
    /// Rebuild a site from persisted target counts; the execution count is
    /// their sum.
    pub fn from_targets(targets: BTreeMap<GuestAddr, u64>) -> Self {
        let execution_count = targets.values().fold(0u64, |acc, n| acc.saturating_add(*n));
        Self {
            execution_count,
            targets,
        }
    }

    /// Count one execution that went to `target`
    pub fn profile(&mut self, target: GuestAddr) {
        self.execution_count = self.execution_count.saturating_add(1);
        let count = self.targets.entry(target).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Record `target` as reachable without counting an execution
    pub fn register_target(&mut self, target: GuestAddr) {
        self.targets.entry(target).or_insert(0);
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Times the branch went to `target`
    pub fn frequency(&self, target: GuestAddr) -> Option<u64> {
        self.targets.get(&target).copied()
    }

    /// `-1` for an unexecuted site, `0` for an unseen target, otherwise the
    /// observed ratio.
    pub fn probability(&self, target: GuestAddr) -> f32 {
        if self.execution_count == 0 {
            return UNKNOWN_PROBABILITY;
        }
        match self.targets.get(&target) {
            Some(&n) => n as f32 / self.execution_count as f32,
            None => 0.0,
        }
    }

    pub fn targets(&self) -> BTreeSet<GuestAddr> {
        self.targets.keys().copied().collect()
    }

    /// Targets with their counts, in address order
    pub fn target_counts(&self) -> impl Iterator<Item = (GuestAddr, u64)> + '_ {
        self.targets.iter().map(|(addr, n)| (*addr, *n))
    }
}

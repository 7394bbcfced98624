//! Branch history
//!
//! A [`BranchHistory`] pairs a branch-site table with a procedure table. The
//! site table can be shared: a global history owns a fresh one and any number
//! of local (trace-scoped) histories borrow it through [`BranchHistory::local_to`],
//! so indirect-branch knowledge is program-wide while procedure detail stays
//! local.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dbt_core::GuestAddr;
use log::{debug, trace};
use parking_lot::RwLock;

use crate::procedure::ProcedureRecord;
use crate::site::{BranchSite, UNKNOWN_PROBABILITY};

/// Branch-site table shared between histories
pub type SiteTable = RwLock<BTreeMap<GuestAddr, BranchSite>>;

/// Classification of a control transfer the decoder could not resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    IndirectBranch,
    DirectBranch,
    Call,
    Return,
}

/// Numeric branch kind outside the known range
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid branch kind code {0}")]
pub struct InvalidBranchKind(pub u32);

impl TryFrom<u32> for BranchKind {
    type Error = InvalidBranchKind;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(BranchKind::IndirectBranch),
            1 => Ok(BranchKind::DirectBranch),
            2 => Ok(BranchKind::Call),
            3 => Ok(BranchKind::Return),
            other => Err(InvalidBranchKind(other)),
        }
    }
}

/// Branch and procedure profile of a guest program
#[derive(Debug)]
pub struct BranchHistory {
    pub(crate) sites: Arc<SiteTable>,
    pub(crate) procedures: RwLock<BTreeMap<GuestAddr, ProcedureRecord>>,
}

impl Default for BranchHistory {
    fn default() -> Self {
        Self::new_global()
    }
}

impl BranchHistory {
    /// A history with its own, fresh branch-site table
    pub fn new_global() -> Self {
        Self::with_sites(Arc::new(RwLock::new(BTreeMap::new())))
    }

    /// A history sharing `global`'s branch-site table with an empty
    /// procedure table of its own
    pub fn local_to(global: &BranchHistory) -> Self {
        Self::with_sites(Arc::clone(&global.sites))
    }

    /// A history over an explicitly supplied site table
    pub fn with_sites(sites: Arc<SiteTable>) -> Self {
        Self {
            sites,
            procedures: RwLock::new(BTreeMap::new()),
        }
    }

    /// The branch-site table, for building further local histories
    pub fn site_table(&self) -> Arc<SiteTable> {
        Arc::clone(&self.sites)
    }

    /// Do both histories see the same branch sites?
    pub fn shares_sites_with(&self, other: &BranchHistory) -> bool {
        Arc::ptr_eq(&self.sites, &other.sites)
    }

    // ------------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------------

    /// Record a call instruction at `pc` to `dest` returning to `return_addr`
    pub fn register_call(&self, pc: GuestAddr, dest: GuestAddr, return_addr: GuestAddr) {
        self.procedures
            .write()
            .entry(dest)
            .or_insert_with(|| ProcedureRecord::new(dest))
            .register_call(pc, return_addr);
        trace!("call {} -> {} (returns to {})", pc, dest, return_addr);
        self.register_branch(pc, dest);
    }

    /// Record a return instruction at `pc`. When the link value is known the
    /// transfer `pc -> lr` is registered as a branch as well.
    pub fn register_return(&self, pc: GuestAddr, lr: Option<GuestAddr>) {
        {
            let mut procedures = self.procedures.write();
            if let Some((_, procedure)) = procedures.range_mut(..=pc).next_back() {
                procedure.register_return(pc);
            }
        }
        if let Some(lr) = lr {
            self.register_branch(pc, lr);
        }
    }

    /// Record that `origin` can branch to `target` without counting an
    /// execution
    pub fn register_branch(&self, origin: GuestAddr, target: GuestAddr) {
        self.sites
            .write()
            .entry(origin)
            .or_default()
            .register_target(target);
    }

    /// Count one observed execution of `origin` going to `target`
    pub fn profile(&self, origin: GuestAddr, target: GuestAddr) {
        self.sites.write().entry(origin).or_default().profile(target);
    }

    /// Route an unresolved control transfer by kind.
    ///
    /// Calls without a known return address only register the branch.
    pub fn record_uncaught_branch(
        &self,
        origin: GuestAddr,
        dest: GuestAddr,
        kind: BranchKind,
        return_addr: Option<GuestAddr>,
    ) {
        match (kind, return_addr) {
            (BranchKind::Call, Some(ret)) => self.register_call(origin, dest, ret),
            (BranchKind::Call, None) => {
                debug!("call at {} without return address", origin);
                self.register_branch(origin, dest);
            }
            (BranchKind::Return, _) => self.register_return(origin, Some(dest)),
            (BranchKind::IndirectBranch | BranchKind::DirectBranch, _) => {
                self.register_branch(origin, dest)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// `-1` if `origin` is unknown or never executed, `0` if `target` was
    /// never observed, else the fraction of executions that went to `target`
    pub fn branch_probability(&self, origin: GuestAddr, target: GuestAddr) -> f32 {
        self.sites
            .read()
            .get(&origin)
            .map_or(UNKNOWN_PROBABILITY, |site| site.probability(target))
    }

    pub fn known_targets(&self, origin: GuestAddr) -> Option<BTreeSet<GuestAddr>> {
        self.sites.read().get(&origin).map(BranchSite::targets)
    }

    /// Snapshot of the site at `origin`
    pub fn site(&self, origin: GuestAddr) -> Option<BranchSite> {
        self.sites.read().get(&origin).cloned()
    }

    pub fn execution_count(&self, origin: GuestAddr) -> u64 {
        self.sites
            .read()
            .get(&origin)
            .map_or(0, BranchSite::execution_count)
    }

    pub fn site_count(&self) -> usize {
        self.sites.read().len()
    }

    /// Snapshot of the procedure entered at `entry`
    pub fn procedure(&self, entry: GuestAddr) -> Option<ProcedureRecord> {
        self.procedures.read().get(&entry).cloned()
    }

    /// The procedure with the largest entry address not above `pc`.
    ///
    /// This is a heuristic: tail calls and non-contiguous procedures can be
    /// attributed to the wrong entry.
    pub fn likely_procedure(&self, pc: GuestAddr) -> Option<ProcedureRecord> {
        self.procedures
            .read()
            .range(..=pc)
            .next_back()
            .map(|(_, p)| p.clone())
    }

    /// Addresses that calls to the procedure at `entry` return to
    pub fn return_addresses(&self, entry: GuestAddr) -> Option<BTreeSet<GuestAddr>> {
        self.procedures
            .read()
            .get(&entry)
            .map(ProcedureRecord::return_addresses)
    }

    /// Return instructions attributed to the procedure at `entry`
    pub fn return_sites(&self, entry: GuestAddr) -> Option<BTreeSet<GuestAddr>> {
        self.procedures
            .read()
            .get(&entry)
            .map(|p| p.return_sites().clone())
    }

    pub fn procedure_count(&self) -> usize {
        self.procedures.read().len()
    }

    /// Forget all branch sites and procedures. Local histories sharing the
    /// site table lose their sites too.
    pub fn reset(&self) {
        let mut sites = self.sites.write();
        let mut procedures = self.procedures.write();
        sites.clear();
        procedures.clear();
    }
}

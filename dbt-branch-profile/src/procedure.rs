//! Procedure call/return bookkeeping

use std::collections::BTreeSet;

use dbt_core::GuestAddr;

/// A call instruction and the address it returns to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallSite {
    /// Address of the call instruction
    pub from: GuestAddr,
    /// Address execution resumes at after the callee returns
    pub return_to: GuestAddr,
}

/// What is known about one procedure, keyed by its entry address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureRecord {
    entry: GuestAddr,
    call_sites: BTreeSet<CallSite>,
    return_sites: BTreeSet<GuestAddr>,
}

impl ProcedureRecord {
    pub fn new(entry: GuestAddr) -> Self {
        Self {
            entry,
            call_sites: BTreeSet::new(),
            return_sites: BTreeSet::new(),
        }
    }

    pub fn entry(&self) -> GuestAddr {
        self.entry
    }

    /// Add a caller; duplicates are ignored
    pub fn register_call(&mut self, from: GuestAddr, return_to: GuestAddr) {
        self.call_sites.insert(CallSite { from, return_to });
    }

    /// Add a return instruction of this procedure
    pub fn register_return(&mut self, at: GuestAddr) {
        self.return_sites.insert(at);
    }

    pub fn call_sites(&self) -> &BTreeSet<CallSite> {
        &self.call_sites
    }

    pub fn return_sites(&self) -> &BTreeSet<GuestAddr> {
        &self.return_sites
    }

    /// Every address a call to this procedure returns to
    pub fn return_addresses(&self) -> BTreeSet<GuestAddr> {
        self.call_sites.iter().map(|c| c.return_to).collect()
    }
}

//! # dbt-branch-profile
//!
//! Records which addresses each branch instruction was seen to transfer
//! control to, and how often, together with the call/return structure of the
//! guest program. Compilers use it to decide what to speculate on; the
//! profile can be saved after a run and loaded into the next.
//!
//! ```rust
//! use dbt_branch_profile::BranchHistory;
//! use dbt_core::GuestAddr;
//!
//! let history = BranchHistory::new_global();
//! history.profile(GuestAddr(0x1000), GuestAddr(0x2000));
//! history.profile(GuestAddr(0x1000), GuestAddr(0x3000));
//! assert_eq!(history.branch_probability(GuestAddr(0x1000), GuestAddr(0x2000)), 0.5);
//! ```

pub mod history;
mod persist;
pub mod procedure;
pub mod site;

pub use history::{BranchHistory, BranchKind, InvalidBranchKind, SiteTable};
pub use procedure::{CallSite, ProcedureRecord};
pub use site::{BranchSite, UNKNOWN_PROBABILITY};

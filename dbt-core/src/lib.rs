//! # dbt-core - dynamic binary translator core
//!
//! Core types shared by every part of the translator.
//!
//! ## Main components
//!
//! - **Addresses**: [`GuestAddr`], the guest virtual address type
//! - **Process state**: [`GuestContext`] owns the program counter, the
//!   finished flag and the (opaque) guest registers and memory
//! - **Decoder boundary**: [`Decoder`] and [`Instruction`]
//! - **Compiler boundary**: [`Compiler`] and [`CompiledCode`]
//! - **System calls**: [`SyscallDispatch`], [`SyscallConvention`], [`SyscallArgs`]
//! - **Errors**: [`DbtError`] and [`DbtResult`]
//! - **Options**: [`DbtOptions`] with `-X:dbt:` flag parsing
//!
//! ## Example
//!
//! ```rust
//! use dbt_core::{DbtOptions, GuestAddr, GuestContext};
//!
//! let (options, program, _args) =
//!     DbtOptions::parse_arguments(["-X:dbt:minTraceValue=40", "a.out"]).unwrap();
//! assert_eq!(options.min_trace_value, 40);
//! assert_eq!(program.as_deref(), Some("a.out"));
//!
//! let ctx = GuestContext::new(GuestAddr(0x1000), ());
//! assert!(!ctx.is_finished());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod compiler;
pub mod context;
pub mod decoder;
pub mod error;
pub mod logging;
pub mod options;
pub mod syscall;

pub use compiler::{CompiledCode, CompiledRef, Compiler};
pub use context::GuestContext;
pub use decoder::{Decoder, Effect, Instruction, InstructionRef};
pub use error::{DbtError, DbtResult};
pub use options::{ControllerKind, DbtOptions};
pub use syscall::{ArgWidth, SyscallArgs, SyscallConvention, SyscallDispatch, SyscallResult};

// ============================================================================
// Address types
// ============================================================================

/// Guest virtual address
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GuestAddr(pub u64);

impl GuestAddr {
    /// Raw address value
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Wrapping addition
    pub fn wrapping_add(self, rhs: u64) -> Self {
        GuestAddr(self.0.wrapping_add(rhs))
    }

    /// Wrapping subtraction
    pub fn wrapping_sub(self, rhs: GuestAddr) -> u64 {
        self.0.wrapping_sub(rhs.0)
    }

    /// Checked addition, `None` on overflow of the guest address space
    pub fn checked_add(self, rhs: u64) -> Option<Self> {
        self.0.checked_add(rhs).map(GuestAddr)
    }
}

impl fmt::Display for GuestAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for GuestAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u64> for GuestAddr {
    fn from(value: u64) -> Self {
        GuestAddr(value)
    }
}

impl From<GuestAddr> for u64 {
    fn from(addr: GuestAddr) -> Self {
        addr.0
    }
}

/// Parses the decimal encoding used by persisted profiles.
impl FromStr for GuestAddr {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(GuestAddr)
    }
}

impl std::ops::Add<u64> for GuestAddr {
    type Output = GuestAddr;

    fn add(self, rhs: u64) -> Self::Output {
        GuestAddr(self.0 + rhs)
    }
}

impl std::ops::AddAssign<u64> for GuestAddr {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl std::ops::Sub for GuestAddr {
    type Output = u64;

    fn sub(self, rhs: GuestAddr) -> Self::Output {
        self.0 - rhs.0
    }
}

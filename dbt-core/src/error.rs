//! Error taxonomy of the translator
//!
//! Decode faults and profile-format errors unwind to the top-level run loop.
//! Guest system call failures are not represented here: they are guest-visible
//! data and travel as [`crate::SyscallResult::Error`].

use thiserror::Error;

use crate::GuestAddr;

/// Result type used throughout the translator
pub type DbtResult<T> = Result<T, DbtError>;

/// Unified translator error
#[derive(Debug, Error)]
pub enum DbtError {
    /// An instruction could not be decoded at `pc`
    #[error("bad instruction at {pc}: {reason}")]
    BadInstruction {
        /// Faulting instruction address
        pc: GuestAddr,
        /// Decoder diagnostic
        reason: String,
    },

    /// Control was transferred to an address outside mapped guest memory
    #[error("unmapped pc {pc}")]
    UnmappedPc {
        /// Target address
        pc: GuestAddr,
    },

    /// Trace formation yielded no instructions
    #[error("empty trace at {pc}")]
    EmptyTrace {
        /// Trace start address
        pc: GuestAddr,
    },

    /// Malformed persisted branch profile
    #[error("file is not a valid branch profile: {reason}")]
    ProfileFormat {
        /// What did not match the expected schema
        reason: String,
    },

    /// The compiler backend rejected a trace
    #[error("failed to compile trace at {pc}: {reason}")]
    Compile {
        /// Trace entry address
        pc: GuestAddr,
        /// Backend diagnostic
        reason: String,
    },

    /// Invalid option or configuration document
    #[error("invalid configuration: {reason}")]
    Config {
        /// Description of the offending option
        reason: String,
    },

    /// An external party raised a fatal error while the run loop was active
    #[error("emulation aborted: {reason}")]
    Aborted {
        /// Reason given by the aborting party
        reason: String,
    },

    /// Host I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbtError {
    /// Construct a decode fault
    pub fn bad_instruction(pc: GuestAddr, reason: impl Into<String>) -> Self {
        DbtError::BadInstruction {
            pc,
            reason: reason.into(),
        }
    }

    /// Construct a profile-format error
    pub fn profile_format(reason: impl Into<String>) -> Self {
        DbtError::ProfileFormat {
            reason: reason.into(),
        }
    }

    /// Construct a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        DbtError::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error is a decode fault of the guest program
    /// (as opposed to a host-side failure)
    pub fn is_decode_fault(&self) -> bool {
        matches!(
            self,
            DbtError::BadInstruction { .. } | DbtError::UnmappedPc { .. }
        )
    }

    /// Guest address the error is attributed to, if any
    pub fn faulting_pc(&self) -> Option<GuestAddr> {
        match self {
            DbtError::BadInstruction { pc, .. }
            | DbtError::UnmappedPc { pc }
            | DbtError::EmptyTrace { pc }
            | DbtError::Compile { pc, .. } => Some(*pc),
            _ => None,
        }
    }
}

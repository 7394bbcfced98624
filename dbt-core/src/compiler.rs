//! Compiler boundary
//!
//! A compiler turns the decoded instructions of a trace into a routine that
//! can be invoked in place of interpreting them. The routine must be
//! observationally equivalent to interpretation: same guest state afterwards
//! and the same next program counter.

use std::sync::Arc;

use crate::{DbtResult, GuestAddr, GuestContext, InstructionRef, SyscallDispatch};

/// A compiled trace
pub trait CompiledCode<S>: Send + Sync {
    /// Run the trace starting at `ctx.pc` and return the address to resume at.
    ///
    /// System calls raised inside the trace are serviced through `syscalls`
    /// before the routine continues.
    fn invoke(
        &self,
        ctx: &mut GuestContext<S>,
        syscalls: &mut dyn SyscallDispatch<S>,
    ) -> DbtResult<GuestAddr>;

    /// Number of guest instructions covered by this routine
    fn instruction_count(&self) -> usize;
}

/// Shared handle to compiled code
pub type CompiledRef<S> = Arc<dyn CompiledCode<S>>;

/// Translates traces into compiled code
pub trait Compiler<S>: Send + Sync {
    /// Compile the trace starting at `entry_pc`.
    ///
    /// # Errors
    ///
    /// [`crate::DbtError::Compile`] if the backend cannot handle the trace.
    fn compile(&self, trace: &[InstructionRef<S>], entry_pc: GuestAddr)
    -> DbtResult<CompiledRef<S>>;
}

impl<S, C: Compiler<S> + ?Sized> Compiler<S> for Arc<C> {
    fn compile(
        &self,
        trace: &[InstructionRef<S>],
        entry_pc: GuestAddr,
    ) -> DbtResult<CompiledRef<S>> {
        (**self).compile(trace, entry_pc)
    }
}

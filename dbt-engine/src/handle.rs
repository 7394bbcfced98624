//! Compiled-code handles
//!
//! Handles are shared through `Arc`. Replacing a trace's compiled code marks
//! the previous handle obsolete; invocations already running it keep their
//! reference and finish normally.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dbt_core::{CompiledRef, DbtResult, GuestAddr, GuestContext, SyscallDispatch};

/// Compiled code of one trace
pub struct CompiledHandle<S> {
    entry_pc: GuestAddr,
    code: CompiledRef<S>,
    generation: u32,
    obsolete: AtomicBool,
    invocations: AtomicU64,
}

impl<S> CompiledHandle<S> {
    pub fn new(entry_pc: GuestAddr, code: CompiledRef<S>, generation: u32) -> Self {
        Self {
            entry_pc,
            code,
            generation,
            obsolete: AtomicBool::new(false),
            invocations: AtomicU64::new(0),
        }
    }

    /// Run the compiled trace and return the next program counter
    pub fn invoke(
        &self,
        ctx: &mut GuestContext<S>,
        syscalls: &mut dyn SyscallDispatch<S>,
    ) -> DbtResult<GuestAddr> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.code.invoke(ctx, syscalls)
    }

    pub fn entry_pc(&self) -> GuestAddr {
        self.entry_pc
    }

    /// 0 for the first compilation of a trace, incremented by each
    /// replacement
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn instruction_count(&self) -> usize {
        self.code.instruction_count()
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Flag this handle as superseded. Only consulted when deciding whether
    /// to compile; running invocations are unaffected.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl<S> fmt::Debug for CompiledHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledHandle")
            .field("entry_pc", &self.entry_pc)
            .field("generation", &self.generation)
            .field("instructions", &self.code.instruction_count())
            .field("obsolete", &self.is_obsolete())
            .finish()
    }
}

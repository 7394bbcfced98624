//! Traces and trace formation
//!
//! A trace is the straight-line run of instructions starting at some address
//! up to the first control transfer whose target is not statically known.
//! Its instructions are decoded once and never change afterwards.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dbt_core::{
    CompiledRef, Compiler, DbtError, DbtResult, Decoder, GuestAddr, InstructionRef,
};
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::handle::CompiledHandle;

/// Decode the trace starting at `start_pc`.
///
/// Formation stops after an instruction with no static successor, after
/// `max_len` instructions, or before an instruction that fails to decode.
/// Only a fault on the first instruction is reported; later ones surface if
/// execution actually gets there.
pub fn form_trace<S, D>(
    decoder: &D,
    state: &S,
    start_pc: GuestAddr,
    max_len: usize,
) -> DbtResult<Vec<InstructionRef<S>>>
where
    D: Decoder<S> + ?Sized,
{
    if max_len == 0 {
        return Err(DbtError::EmptyTrace { pc: start_pc });
    }

    let mut instructions: Vec<InstructionRef<S>> = Vec::new();
    let mut pc = start_pc;
    loop {
        let insn = match decoder.decode(state, pc) {
            Ok(insn) => insn,
            Err(e) if !instructions.is_empty() && e.is_decode_fault() => {
                trace!("trace at {} ends before undecodable {}: {}", start_pc, pc, e);
                break;
            }
            Err(e) => return Err(e),
        };
        let next = insn.successor(pc);
        instructions.push(insn);

        match next {
            Some(next) if instructions.len() < max_len => pc = next,
            _ => break,
        }
    }

    trace!("formed trace at {} ({} instructions)", start_pc, instructions.len());
    Ok(instructions)
}

/// Compilation state of a trace
pub enum CompileState<S> {
    /// Never compiled
    Idle,
    /// A compilation has been claimed and not yet completed
    InFlight,
    /// Compiled code is installed
    Ready(Arc<CompiledHandle<S>>),
    /// The backend rejected the trace; it stays interpreted
    Failed,
}

impl<S> fmt::Debug for CompileState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileState::Idle => f.write_str("Idle"),
            CompileState::InFlight => f.write_str("InFlight"),
            CompileState::Ready(handle) => f.debug_tuple("Ready").field(handle).finish(),
            CompileState::Failed => f.write_str("Failed"),
        }
    }
}

/// A cached trace
pub struct Trace<S> {
    start_pc: GuestAddr,
    instructions: Vec<InstructionRef<S>>,
    heat: AtomicU32,
    state: Mutex<CompileState<S>>,
    settled: Condvar,
    generation: AtomicU32,
}

impl<S> Trace<S> {
    pub fn new(start_pc: GuestAddr, instructions: Vec<InstructionRef<S>>) -> Self {
        Self {
            start_pc,
            instructions,
            heat: AtomicU32::new(0),
            state: Mutex::new(CompileState::Idle),
            settled: Condvar::new(),
            generation: AtomicU32::new(0),
        }
    }

    pub fn start_pc(&self) -> GuestAddr {
        self.start_pc
    }

    pub fn instructions(&self) -> &[InstructionRef<S>] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn heat(&self) -> u32 {
        self.heat.load(Ordering::Relaxed)
    }

    /// Add `amount` to the heat, returning the new value
    pub fn add_heat(&self, amount: u32) -> u32 {
        self.heat
            .fetch_add(amount, Ordering::Relaxed)
            .saturating_add(amount)
    }

    /// Current compiled code, without waiting for an in-flight compilation
    pub fn compiled(&self) -> Option<Arc<CompiledHandle<S>>> {
        match &*self.state.lock() {
            CompileState::Ready(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    pub fn is_compile_failed(&self) -> bool {
        matches!(*self.state.lock(), CompileState::Failed)
    }

    pub fn is_compile_in_flight(&self) -> bool {
        matches!(*self.state.lock(), CompileState::InFlight)
    }

    /// Claim the right to compile this trace. At most one caller succeeds
    /// until the claim is completed or abandoned. A trace whose compiled code
    /// was marked obsolete can be claimed again.
    pub fn try_claim(&self) -> bool {
        let mut state = self.state.lock();
        let claimable = match &*state {
            CompileState::Idle => true,
            CompileState::Ready(handle) => handle.is_obsolete(),
            CompileState::InFlight | CompileState::Failed => false,
        };
        if claimable {
            *state = CompileState::InFlight;
        }
        claimable
    }

    /// Finish a claimed compilation
    pub fn complete(&self, result: DbtResult<CompiledRef<S>>) -> Option<Arc<CompiledHandle<S>>> {
        let outcome = match result {
            Ok(code) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let handle = Arc::new(CompiledHandle::new(self.start_pc, code, generation));
                debug!(
                    target: dbt_core::logging::TARGET_TRANSLATION,
                    "compiled trace at {} ({} instructions, generation {})",
                    self.start_pc,
                    self.len(),
                    generation
                );
                CompileState::Ready(handle)
            }
            Err(e) => {
                warn!("trace at {} stays interpreted: {}", self.start_pc, e);
                CompileState::Failed
            }
        };

        let mut state = self.state.lock();
        *state = outcome;
        self.settled.notify_all();
        match &*state {
            CompileState::Ready(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Give up a claim without compiling
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        if matches!(*state, CompileState::InFlight) {
            *state = CompileState::Idle;
        }
        self.settled.notify_all();
    }

    /// Wait for an in-flight compilation to settle and return the compiled
    /// code, if any
    pub fn wait_compiled(&self) -> Option<Arc<CompiledHandle<S>>> {
        let mut state = self.state.lock();
        while matches!(*state, CompileState::InFlight) {
            self.settled.wait(&mut state);
        }
        match &*state {
            CompileState::Ready(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Run `compiler` over this trace and complete the claim with its result.
    /// The caller must hold the claim from [`Trace::try_claim`].
    pub fn compile_claimed(&self, compiler: &dyn Compiler<S>) -> Option<Arc<CompiledHandle<S>>> {
        let result = compiler.compile(&self.instructions, self.start_pc);
        self.complete(result)
    }

    /// Install `code` in place of the current compiled code. The previous
    /// handle, if any, is marked obsolete and returned.
    pub fn replace_compiled(&self, code: CompiledRef<S>) -> Option<Arc<CompiledHandle<S>>> {
        let mut state = self.state.lock();
        while matches!(*state, CompileState::InFlight) {
            self.settled.wait(&mut state);
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(CompiledHandle::new(self.start_pc, code, generation));
        let previous = std::mem::replace(&mut *state, CompileState::Ready(handle));
        self.settled.notify_all();

        match previous {
            CompileState::Ready(old) => {
                old.mark_obsolete();
                debug!(
                    target: dbt_core::logging::TARGET_TRANSLATION,
                    "replaced compiled trace at {} (generation {} obsolete)",
                    self.start_pc,
                    old.generation()
                );
                Some(old)
            }
            _ => None,
        }
    }
}

impl<S> fmt::Debug for Trace<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("start_pc", &self.start_pc)
            .field("instructions", &self.instructions.len())
            .field("heat", &self.heat())
            .field("state", &*self.state.lock())
            .finish()
    }
}

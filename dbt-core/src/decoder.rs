//! Decoder / instruction boundary
//!
//! Guest architectures plug into the engine by implementing [`Decoder`] and
//! [`Instruction`]. Decoding must be deterministic for a fixed memory image:
//! the engine decodes each trace once and reuses the instructions.

use std::fmt;
use std::sync::Arc;

use crate::{DbtResult, GuestAddr, GuestContext};

/// What the engine must do after an instruction executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Nothing beyond advancing the program counter
    Continue,
    /// The instruction requested a system call. The guest registers hold the
    /// call number and arguments according to the guest calling convention.
    Syscall,
}

/// A decoded guest instruction
///
/// On entry to [`Instruction::execute`] the context's `pc` holds the address
/// of this instruction. Instructions whose successor is statically unknown
/// (indirect branches, returns, conditional branches) write the next
/// address into `ctx.pc`; all others leave it alone and the engine advances
/// to [`Instruction::successor`].
pub trait Instruction<S>: Send + Sync + fmt::Debug {
    /// Perform the instruction's side effects on the guest
    fn execute(&self, ctx: &mut GuestContext<S>) -> DbtResult<Effect>;

    /// Address of the next instruction when it is known statically, `None`
    /// for control transfers that depend on run-time state
    fn successor(&self, pc: GuestAddr) -> Option<GuestAddr>;
}

/// Shared handle to a decoded instruction
pub type InstructionRef<S> = Arc<dyn Instruction<S>>;

/// Produces instructions from guest memory
pub trait Decoder<S> {
    /// Decode the instruction at `pc`.
    ///
    /// # Errors
    ///
    /// [`crate::DbtError::UnmappedPc`] if `pc` is not mapped and
    /// [`crate::DbtError::BadInstruction`] if the bytes at `pc` are not a
    /// valid instruction.
    fn decode(&self, state: &S, pc: GuestAddr) -> DbtResult<InstructionRef<S>>;
}

impl<S, D: Decoder<S> + ?Sized> Decoder<S> for Box<D> {
    fn decode(&self, state: &S, pc: GuestAddr) -> DbtResult<InstructionRef<S>> {
        (**self).decode(state, pc)
    }
}

impl<S, D: Decoder<S> + ?Sized> Decoder<S> for Arc<D> {
    fn decode(&self, state: &S, pc: GuestAddr) -> DbtResult<InstructionRef<S>> {
        (**self).decode(state, pc)
    }
}

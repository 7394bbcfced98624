//! Interpretation of single instructions and whole traces

use dbt_branch_profile::BranchHistory;
use dbt_core::syscall::service_syscall;
use dbt_core::{
    DbtResult, Effect, GuestContext, Instruction, InstructionRef, SyscallConvention,
    SyscallDispatch,
};

/// Execute one instruction at `ctx.pc` and advance the program counter.
///
/// Instructions with a static successor have `pc` set to it; for the others
/// the value the instruction wrote is kept. A requested system call is
/// serviced afterwards, so the dispatcher sees the resume address in `pc`.
/// Returns whether the successor was static.
pub fn execute_instruction<S: SyscallConvention>(
    insn: &dyn Instruction<S>,
    ctx: &mut GuestContext<S>,
    syscalls: &mut dyn SyscallDispatch<S>,
) -> DbtResult<bool> {
    let pc = ctx.pc;
    let effect = insn.execute(ctx)?;
    let next = insn.successor(pc);
    if let Some(next) = next {
        ctx.pc = next;
    }
    if effect == Effect::Syscall {
        service_syscall(ctx, syscalls);
    }
    Ok(next.is_some())
}

/// Like [`execute_instruction`], additionally profiling the transfer when the
/// successor was not static
pub fn execute_profiled<S: SyscallConvention>(
    insn: &dyn Instruction<S>,
    ctx: &mut GuestContext<S>,
    syscalls: &mut dyn SyscallDispatch<S>,
    history: &BranchHistory,
) -> DbtResult<()> {
    let origin = ctx.pc;
    let static_successor = execute_instruction(insn, ctx, syscalls)?;
    if !static_successor && !ctx.is_finished() {
        history.profile(origin, ctx.pc);
    }
    Ok(())
}

/// Interpret the instructions of a trace in order, starting at `ctx.pc`.
///
/// The trace is left early when the process finishes or the program counter
/// no longer matches the next trace instruction (a system call redirected
/// control). When `history` is given the final instruction's transfer is
/// profiled if it was not static. Returns the number of instructions
/// executed.
pub fn interpret_trace<S: SyscallConvention>(
    instructions: &[InstructionRef<S>],
    ctx: &mut GuestContext<S>,
    syscalls: &mut dyn SyscallDispatch<S>,
    history: Option<&BranchHistory>,
) -> DbtResult<usize> {
    let last = instructions.len().saturating_sub(1);
    for (index, insn) in instructions.iter().enumerate() {
        let pc = ctx.pc;
        match history {
            Some(history) if index == last => {
                execute_profiled(insn.as_ref(), ctx, syscalls, history)?
            }
            _ => {
                execute_instruction(insn.as_ref(), ctx, syscalls)?;
            }
        }

        if index < last && (ctx.is_finished() || insn.successor(pc) != Some(ctx.pc)) {
            return Ok(index + 1);
        }
    }
    Ok(instructions.len())
}

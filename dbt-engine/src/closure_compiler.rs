//! Closure-chain compiler
//!
//! Turns a trace into a vector of pre-linked closures, one per instruction,
//! with every static successor resolved at compile time. No host code is
//! generated; the result behaves exactly like interpreting the trace and
//! serves as the default backend.

use std::sync::Arc;

use dbt_core::syscall::service_syscall;
use dbt_core::{
    CompiledCode, CompiledRef, Compiler, DbtError, DbtResult, Effect, GuestAddr, GuestContext,
    InstructionRef, SyscallConvention, SyscallDispatch,
};

/// Runs one instruction; `Ok(true)` means fall through to the next step
type Step<S> = Box<
    dyn Fn(&mut GuestContext<S>, &mut dyn SyscallDispatch<S>) -> DbtResult<bool> + Send + Sync,
>;

/// Compiled form produced by [`ClosureCompiler`]
pub struct ClosureCode<S> {
    entry_pc: GuestAddr,
    steps: Vec<Step<S>>,
}

impl<S> CompiledCode<S> for ClosureCode<S> {
    fn invoke(
        &self,
        ctx: &mut GuestContext<S>,
        syscalls: &mut dyn SyscallDispatch<S>,
    ) -> DbtResult<GuestAddr> {
        debug_assert_eq!(ctx.pc, self.entry_pc);
        for step in &self.steps {
            if !step(ctx, syscalls)? {
                break;
            }
        }
        Ok(ctx.pc)
    }

    fn instruction_count(&self) -> usize {
        self.steps.len()
    }
}

/// Reference compiler backend
#[derive(Debug, Clone, Default)]
pub struct ClosureCompiler {
    max_instructions: Option<usize>,
}

impl ClosureCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject traces longer than `limit` with [`DbtError::Compile`]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            max_instructions: Some(limit),
        }
    }
}

impl<S: SyscallConvention + 'static> Compiler<S> for ClosureCompiler {
    fn compile(
        &self,
        trace: &[InstructionRef<S>],
        entry_pc: GuestAddr,
    ) -> DbtResult<CompiledRef<S>> {
        if trace.is_empty() {
            return Err(DbtError::EmptyTrace { pc: entry_pc });
        }
        match self.max_instructions {
            Some(limit) if trace.len() > limit => {
                return Err(DbtError::Compile {
                    pc: entry_pc,
                    reason: format!("{} instructions exceed the limit of {}", trace.len(), limit),
                });
            }
            _ => {}
        }

        let mut steps: Vec<Step<S>> = Vec::with_capacity(trace.len());
        let mut pc = entry_pc;
        for (index, insn) in trace.iter().enumerate() {
            let last = index + 1 == trace.len();
            let next = insn.successor(pc);
            let next_pc = match next {
                Some(next) => next,
                None if last => pc,
                None => {
                    return Err(DbtError::Compile {
                        pc: entry_pc,
                        reason: format!("instruction at {pc} has no static successor"),
                    });
                }
            };

            let insn = Arc::clone(insn);
            steps.push(Box::new(
                move |ctx: &mut GuestContext<S>, syscalls: &mut dyn SyscallDispatch<S>| {
                    let effect = insn.execute(ctx)?;
                    if let Some(next) = next {
                        ctx.pc = next;
                    }
                    if effect == Effect::Syscall {
                        service_syscall(ctx, syscalls);
                    }
                    Ok(!last && !ctx.is_finished() && Some(ctx.pc) == next)
                },
            ));
            pc = next_pc;
        }

        Ok(Arc::new(ClosureCode { entry_pc, steps }))
    }
}

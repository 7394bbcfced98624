//! Execution strategies
//!
//! The five run-loop policies form one closed enum. Each variant holds only
//! the state it needs and [`ExecutionStrategy::step`] dispatches on it.
//!
//! | Strategy | Unit of work | Compiles |
//! |----------|--------------|----------|
//! | `PureInterpreter` | one instruction | never |
//! | `CachingInterpreter` | one trace | never |
//! | `ProfilingInterpreter` | one instruction | never |
//! | `StagedCompiler` | one trace | once its heat passes the threshold |
//! | `EagerCompiler` | one trace | on first visit |

use std::fmt;
use std::sync::Arc;

use dbt_branch_profile::BranchHistory;
use dbt_core::logging::TARGET_RUNTIME;
use dbt_core::{
    Compiler, ControllerKind, DbtResult, Decoder, GuestContext, SyscallConvention,
    SyscallDispatch,
};
use log::trace;

use crate::handle::CompiledHandle;
use crate::interp::{execute_instruction, execute_profiled, interpret_trace};
use crate::registry::TraceRegistry;
use crate::stats::ExecutionStats;
use crate::trace::Trace;
use crate::worker::BackgroundCompiler;

/// Run-loop policy
pub enum ExecutionStrategy<S> {
    /// Decode and execute one instruction per step
    PureInterpreter,
    /// Interpret whole traces, memoising those longer than
    /// `min_trace_length`. With `profile` set, the transfer at the end of
    /// every trace is profiled.
    CachingInterpreter {
        min_trace_length: usize,
        profile: Option<Arc<BranchHistory>>,
    },
    /// Like `PureInterpreter`, profiling every transfer whose target was not
    /// static
    ProfilingInterpreter { history: Arc<BranchHistory> },
    /// Interpret traces, accumulating heat, and run compiled code once the
    /// heat exceeds `threshold`. With `background` set, compilation happens
    /// on worker threads and the trace stays interpreted until it is ready.
    StagedCompiler {
        threshold: u32,
        compiler: Arc<dyn Compiler<S>>,
        background: Option<BackgroundCompiler<S>>,
    },
    /// Compile every trace on first visit
    EagerCompiler { compiler: Arc<dyn Compiler<S>> },
}

impl<S> ExecutionStrategy<S> {
    pub fn caching(min_trace_length: usize) -> Self {
        ExecutionStrategy::CachingInterpreter {
            min_trace_length,
            profile: None,
        }
    }

    pub fn profiling(history: Arc<BranchHistory>) -> Self {
        ExecutionStrategy::ProfilingInterpreter { history }
    }

    pub fn staged(threshold: u32, compiler: Arc<dyn Compiler<S>>) -> Self {
        ExecutionStrategy::StagedCompiler {
            threshold,
            compiler,
            background: None,
        }
    }

    pub fn eager(compiler: Arc<dyn Compiler<S>>) -> Self {
        ExecutionStrategy::EagerCompiler { compiler }
    }

    /// The option value selecting this strategy
    pub fn kind(&self) -> ControllerKind {
        match self {
            ExecutionStrategy::PureInterpreter => ControllerKind::Interpreter,
            ExecutionStrategy::CachingInterpreter { .. } => ControllerKind::Caching,
            ExecutionStrategy::ProfilingInterpreter { .. } => ControllerKind::Profiling,
            ExecutionStrategy::StagedCompiler { .. } => ControllerKind::Staged,
            ExecutionStrategy::EagerCompiler { .. } => ControllerKind::Translator,
        }
    }

    /// Branch history this strategy records into, if any
    pub fn history(&self) -> Option<&Arc<BranchHistory>> {
        match self {
            ExecutionStrategy::CachingInterpreter { profile, .. } => profile.as_ref(),
            ExecutionStrategy::ProfilingInterpreter { history } => Some(history),
            _ => None,
        }
    }

    /// Background compiler of a staged strategy
    pub fn background(&self) -> Option<&BackgroundCompiler<S>> {
        match self {
            ExecutionStrategy::StagedCompiler { background, .. } => background.as_ref(),
            _ => None,
        }
    }
}

impl<S: SyscallConvention + 'static> ExecutionStrategy<S> {
    /// Staged compilation with `threads` background compile workers
    pub fn staged_background(
        threshold: u32,
        compiler: Arc<dyn Compiler<S>>,
        registry: Arc<TraceRegistry<S>>,
        threads: usize,
    ) -> DbtResult<Self> {
        let background = BackgroundCompiler::start(registry, Arc::clone(&compiler), threads)?;
        Ok(ExecutionStrategy::StagedCompiler {
            threshold,
            compiler,
            background: Some(background),
        })
    }

    /// Perform one unit of work at `ctx.pc`
    pub fn step<D>(
        &mut self,
        ctx: &mut GuestContext<S>,
        decoder: &D,
        registry: &TraceRegistry<S>,
        syscalls: &mut dyn SyscallDispatch<S>,
        stats: &mut ExecutionStats,
    ) -> DbtResult<()>
    where
        D: Decoder<S> + ?Sized,
    {
        stats.steps += 1;
        match self {
            ExecutionStrategy::PureInterpreter => {
                let insn = decoder.decode(&ctx.state, ctx.pc)?;
                execute_instruction(insn.as_ref(), ctx, syscalls)?;
                stats.instructions_interpreted += 1;
            }

            ExecutionStrategy::ProfilingInterpreter { history } => {
                let insn = decoder.decode(&ctx.state, ctx.pc)?;
                execute_profiled(insn.as_ref(), ctx, syscalls, history)?;
                stats.instructions_interpreted += 1;
            }

            ExecutionStrategy::CachingInterpreter {
                min_trace_length,
                profile,
            } => {
                let trace = registry.trace_for(decoder, &ctx.state, ctx.pc, *min_trace_length)?;
                run_interpreted(&trace, ctx, syscalls, profile.as_deref(), stats)?;
            }

            ExecutionStrategy::StagedCompiler {
                threshold,
                compiler,
                background,
            } => {
                let trace = registry.trace_for(decoder, &ctx.state, ctx.pc, 0)?;
                if trace.heat() > *threshold {
                    let handle = match background {
                        Some(workers) => match trace.compiled() {
                            Some(handle) if !handle.is_obsolete() => Some(handle),
                            current => {
                                workers.submit(&trace);
                                current
                            }
                        },
                        None => registry.ensure_compiled(&trace, &**compiler),
                    };
                    if let Some(handle) = handle {
                        return run_compiled(&handle, ctx, syscalls, stats);
                    }
                } else {
                    trace.add_heat(u32::try_from(trace.len()).unwrap_or(u32::MAX));
                }
                run_interpreted(&trace, ctx, syscalls, None, stats)?;
            }

            ExecutionStrategy::EagerCompiler { compiler } => {
                let trace = registry.trace_for(decoder, &ctx.state, ctx.pc, 0)?;
                match registry.ensure_compiled(&trace, &**compiler) {
                    Some(handle) => return run_compiled(&handle, ctx, syscalls, stats),
                    None => run_interpreted(&trace, ctx, syscalls, None, stats)?,
                }
            }
        }
        Ok(())
    }
}

fn run_interpreted<S: SyscallConvention>(
    trace: &Trace<S>,
    ctx: &mut GuestContext<S>,
    syscalls: &mut dyn SyscallDispatch<S>,
    profile: Option<&BranchHistory>,
    stats: &mut ExecutionStats,
) -> DbtResult<()> {
    let executed = interpret_trace(trace.instructions(), ctx, syscalls, profile)?;
    stats.instructions_interpreted += executed as u64;
    stats.traces_interpreted += 1;
    Ok(())
}

fn run_compiled<S>(
    handle: &CompiledHandle<S>,
    ctx: &mut GuestContext<S>,
    syscalls: &mut dyn SyscallDispatch<S>,
    stats: &mut ExecutionStats,
) -> DbtResult<()> {
    let entry = ctx.pc;
    let next = handle.invoke(ctx, syscalls)?;
    ctx.pc = next;
    stats.compiled_invocations += 1;
    trace!(target: TARGET_RUNTIME, "compiled trace {} -> {}", entry, next);
    Ok(())
}

impl<S> fmt::Debug for ExecutionStrategy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStrategy::PureInterpreter => f.write_str("PureInterpreter"),
            ExecutionStrategy::CachingInterpreter {
                min_trace_length,
                profile,
            } => f
                .debug_struct("CachingInterpreter")
                .field("min_trace_length", min_trace_length)
                .field("profiling", &profile.is_some())
                .finish(),
            ExecutionStrategy::ProfilingInterpreter { .. } => f.write_str("ProfilingInterpreter"),
            ExecutionStrategy::StagedCompiler {
                threshold,
                background,
                ..
            } => f
                .debug_struct("StagedCompiler")
                .field("threshold", threshold)
                .field("background", &background.is_some())
                .finish(),
            ExecutionStrategy::EagerCompiler { .. } => f.write_str("EagerCompiler"),
        }
    }
}

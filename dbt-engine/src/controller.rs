//! Run loop
//!
//! [`ExecutionController`] owns the strategy, the decoder and the trace
//! registry and drives a guest process until it finishes, a fault unwinds, or
//! an external party aborts the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dbt_branch_profile::BranchHistory;
use dbt_core::logging::{TARGET_RUNTIME, TARGET_SYSCALL};
use dbt_core::{
    Compiler, ControllerKind, DbtError, DbtOptions, DbtResult, Decoder, GuestContext,
    SyscallArgs, SyscallConvention, SyscallDispatch, SyscallResult,
};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::registry::TraceRegistry;
use crate::stats::ExecutionStats;
use crate::strategy::ExecutionStrategy;

/// Lets another thread stop a running emulation with a fatal error.
///
/// The run loop checks the handle once per step.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortState>,
}

#[derive(Debug, Default)]
struct AbortState {
    raised: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the abort signal. The first reason given is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut slot = self.inner.reason.lock();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        self.inner.raised.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// The error to unwind with, if the signal was raised
    fn check(&self) -> DbtResult<()> {
        if !self.is_aborted() {
            return Ok(());
        }
        let reason = self
            .inner
            .reason
            .lock()
            .clone()
            .unwrap_or_else(|| "aborted".to_owned());
        Err(DbtError::Aborted { reason })
    }
}

/// Counts calls on their way to the real dispatcher, logging each one
/// when `debug_syscall` is set
struct CountingDispatch<'a, S> {
    inner: &'a mut dyn SyscallDispatch<S>,
    calls: u64,
    log_calls: bool,
}

impl<'a, S> CountingDispatch<'a, S> {
    fn new(inner: &'a mut dyn SyscallDispatch<S>, options: &DbtOptions) -> Self {
        Self {
            inner,
            calls: 0,
            log_calls: options.debug_syscall,
        }
    }
}

impl<S> SyscallDispatch<S> for CountingDispatch<'_, S> {
    fn dispatch(
        &mut self,
        call_number: i64,
        args: &mut SyscallArgs,
        ctx: &mut GuestContext<S>,
    ) -> SyscallResult {
        self.calls += 1;
        let result = self.inner.dispatch(call_number, args, ctx);
        if self.log_calls {
            debug!(target: TARGET_SYSCALL, "syscall {} at {} -> {:?}", call_number, ctx.pc, result);
        }
        result
    }
}

/// Drives one guest process with a chosen strategy
pub struct ExecutionController<S, D> {
    strategy: ExecutionStrategy<S>,
    decoder: D,
    registry: Arc<TraceRegistry<S>>,
    history: Arc<BranchHistory>,
    options: DbtOptions,
    stats: ExecutionStats,
    abort: AbortHandle,
    application: Option<String>,
}

impl<S, D> ExecutionController<S, D>
where
    S: SyscallConvention + 'static,
    D: Decoder<S>,
{
    /// Build the strategy selected by `options.controller`
    pub fn new(options: DbtOptions, decoder: D, compiler: Arc<dyn Compiler<S>>) -> DbtResult<Self> {
        options.validate()?;
        let registry = Arc::new(TraceRegistry::new(options.max_trace_length));
        let history = Arc::new(BranchHistory::new_global());

        let strategy = match options.controller {
            ControllerKind::Interpreter => ExecutionStrategy::PureInterpreter,
            ControllerKind::Caching => ExecutionStrategy::caching(options.min_cached_trace_length),
            ControllerKind::Profiling => ExecutionStrategy::profiling(Arc::clone(&history)),
            ControllerKind::Staged if options.background_compilation => {
                ExecutionStrategy::staged_background(
                    options.min_trace_value,
                    compiler,
                    Arc::clone(&registry),
                    options.compiler_threads,
                )?
            }
            ControllerKind::Staged => ExecutionStrategy::staged(options.min_trace_value, compiler),
            ControllerKind::Translator => ExecutionStrategy::eager(compiler),
        };

        Ok(Self::assemble(strategy, decoder, registry, history, options))
    }

    /// Use an explicitly constructed strategy. `registry` must be the one
    /// any background compiler of the strategy was started with.
    pub fn with_strategy(
        strategy: ExecutionStrategy<S>,
        decoder: D,
        registry: Arc<TraceRegistry<S>>,
        options: DbtOptions,
    ) -> Self {
        let history = strategy
            .history()
            .cloned()
            .unwrap_or_else(|| Arc::new(BranchHistory::new_global()));
        Self::assemble(strategy, decoder, registry, history, options)
    }

    fn assemble(
        strategy: ExecutionStrategy<S>,
        decoder: D,
        registry: Arc<TraceRegistry<S>>,
        history: Arc<BranchHistory>,
        options: DbtOptions,
    ) -> Self {
        debug!(target: TARGET_RUNTIME, "execution controller: {:?}", strategy);
        Self {
            strategy,
            decoder,
            registry,
            history,
            options,
            stats: ExecutionStats::default(),
            abort: AbortHandle::new(),
            application: None,
        }
    }

    /// Name recorded in saved branch profiles
    pub fn set_application(&mut self, name: impl Into<String>) {
        self.application = Some(name.into());
    }

    /// Run until the process finishes.
    ///
    /// The branch profile named by `profile_load` is loaded first and the one
    /// named by `profile_save` is written after a clean finish.
    ///
    /// # Errors
    ///
    /// Decode faults, unrecoverable instruction errors, profile I/O errors and
    /// [`DbtError::Aborted`] when the abort handle fires.
    pub fn run(
        &mut self,
        ctx: &mut GuestContext<S>,
        syscalls: &mut dyn SyscallDispatch<S>,
    ) -> DbtResult<()> {
        if let Some(path) = &self.options.profile_load {
            self.history.load(path)?;
        }

        info!(
            target: TARGET_RUNTIME,
            "running {} from {}", self.strategy.kind(), ctx.pc
        );
        let mut counting = CountingDispatch::new(syscalls, &self.options);
        let outcome = self.run_loop(ctx, &mut counting);
        self.stats.syscalls += counting.calls;
        self.stats.compilations = self.registry.stats().compilations;

        if let Err(e) = &outcome {
            warn!("emulation stopped at {}: {}", ctx.pc, e);
            return outcome;
        }
        info!(target: TARGET_RUNTIME, "process finished: {}", self.stats);

        if let Some(path) = &self.options.profile_save {
            self.history.save(path, self.application.as_deref())?;
        }
        Ok(())
    }

    fn run_loop(
        &mut self,
        ctx: &mut GuestContext<S>,
        syscalls: &mut dyn SyscallDispatch<S>,
    ) -> DbtResult<()> {
        while !ctx.is_finished() {
            self.abort.check()?;
            if self.options.debug_runtime {
                debug!(target: TARGET_RUNTIME, "step at {}", ctx.pc);
            }
            self.strategy.step(
                ctx,
                &self.decoder,
                &self.registry,
                syscalls,
                &mut self.stats,
            )?;
        }
        Ok(())
    }

    /// Handle for aborting [`ExecutionController::run`] from elsewhere
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats
    }

    pub fn registry(&self) -> &Arc<TraceRegistry<S>> {
        &self.registry
    }

    pub fn history(&self) -> &Arc<BranchHistory> {
        &self.history
    }

    pub fn strategy(&self) -> &ExecutionStrategy<S> {
        &self.strategy
    }

    pub fn options(&self) -> &DbtOptions {
        &self.options
    }
}

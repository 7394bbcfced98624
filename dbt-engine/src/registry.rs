//! Trace registry
//!
//! Maps trace start addresses to traces. The registry is shared between the
//! run loop and compile workers; every trace carries its own compile slot so
//! that at most one compilation is ever active for a given start address.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dbt_core::{CompiledRef, Compiler, DbtResult, Decoder, GuestAddr};
use log::debug;
use parking_lot::RwLock;

use crate::handle::CompiledHandle;
use crate::trace::{Trace, form_trace};

/// Registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Traces decoded
    pub traces_formed: u64,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Compilations started
    pub compilations: u64,
    /// Compilations the backend rejected
    pub failed_compilations: u64,
    /// Compiled handles replaced
    pub replacements: u64,
}

#[derive(Debug, Default)]
struct Counters {
    traces_formed: AtomicU64,
    hits: AtomicU64,
    compilations: AtomicU64,
    failed_compilations: AtomicU64,
    replacements: AtomicU64,
}

/// Cache of traces keyed by start address
pub struct TraceRegistry<S> {
    traces: RwLock<HashMap<GuestAddr, Arc<Trace<S>>>>,
    max_trace_length: usize,
    counters: Counters,
}

impl<S> TraceRegistry<S> {
    pub fn new(max_trace_length: usize) -> Self {
        Self {
            traces: RwLock::new(HashMap::new()),
            max_trace_length,
            counters: Counters::default(),
        }
    }

    pub fn max_trace_length(&self) -> usize {
        self.max_trace_length
    }

    /// Cached trace starting at `pc`
    pub fn get(&self, pc: GuestAddr) -> Option<Arc<Trace<S>>> {
        self.traces.read().get(&pc).cloned()
    }

    /// Return the trace starting at `pc`, forming it if it is not cached.
    ///
    /// A newly formed trace is cached only if it has more than
    /// `min_cached_len` instructions; shorter ones are returned but not kept.
    /// If another thread cached the same key first, its trace wins.
    pub fn trace_for<D>(
        &self,
        decoder: &D,
        state: &S,
        pc: GuestAddr,
        min_cached_len: usize,
    ) -> DbtResult<Arc<Trace<S>>>
    where
        D: Decoder<S> + ?Sized,
    {
        if let Some(trace) = self.get(pc) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(trace);
        }

        let instructions = form_trace(decoder, state, pc, self.max_trace_length)?;
        self.counters.traces_formed.fetch_add(1, Ordering::Relaxed);
        let trace = Arc::new(Trace::new(pc, instructions));
        if trace.len() > min_cached_len {
            Ok(self.insert(trace))
        } else {
            Ok(trace)
        }
    }

    /// Cache `trace` unless its key is taken; returns the cached trace
    pub fn insert(&self, trace: Arc<Trace<S>>) -> Arc<Trace<S>> {
        let mut traces = self.traces.write();
        Arc::clone(traces.entry(trace.start_pc()).or_insert(trace))
    }

    /// Compiled code for `trace`, compiling it on this thread if no one has.
    ///
    /// A caller that finds a compilation in flight waits for it; all callers
    /// observe the same handle. `None` if the trace cannot be compiled.
    pub fn ensure_compiled(
        &self,
        trace: &Trace<S>,
        compiler: &dyn Compiler<S>,
    ) -> Option<Arc<CompiledHandle<S>>> {
        if trace.try_claim() {
            self.compile_claimed(trace, compiler)
        } else {
            trace.wait_compiled()
        }
    }

    /// Compile a trace whose slot the caller has claimed
    pub fn compile_claimed(
        &self,
        trace: &Trace<S>,
        compiler: &dyn Compiler<S>,
    ) -> Option<Arc<CompiledHandle<S>>> {
        self.counters.compilations.fetch_add(1, Ordering::Relaxed);
        let handle = trace.compile_claimed(compiler);
        if handle.is_none() {
            self.counters
                .failed_compilations
                .fetch_add(1, Ordering::Relaxed);
        }
        handle
    }

    /// Current compiled code of the trace at `pc`
    pub fn compiled(&self, pc: GuestAddr) -> Option<Arc<CompiledHandle<S>>> {
        self.get(pc).and_then(|trace| trace.compiled())
    }

    /// Install `code` for the cached trace at `pc`, marking the previous
    /// handle obsolete. Returns the previous handle; `None` if there was none
    /// or no trace is cached at `pc` (nothing is installed then).
    pub fn replace_compiled(
        &self,
        pc: GuestAddr,
        code: CompiledRef<S>,
    ) -> Option<Arc<CompiledHandle<S>>> {
        let Some(trace) = self.get(pc) else {
            debug!("no trace at {} to replace compiled code for", pc);
            return None;
        };
        self.counters.replacements.fetch_add(1, Ordering::Relaxed);
        trace.replace_compiled(code)
    }

    pub fn len(&self) -> usize {
        self.traces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.read().is_empty()
    }

    /// Drop every cached trace. Handles held elsewhere stay valid.
    pub fn clear(&self) {
        self.traces.write().clear();
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            traces_formed: self.counters.traces_formed.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            compilations: self.counters.compilations.load(Ordering::Relaxed),
            failed_compilations: self.counters.failed_compilations.load(Ordering::Relaxed),
            replacements: self.counters.replacements.load(Ordering::Relaxed),
        }
    }
}

//! Background compilation
//!
//! Worker threads drain a queue of traces whose compile slot has already been
//! claimed, so a trace can be queued at most once. The run loop never waits
//! for them; it keeps interpreting until the handle shows up on the trace.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use dbt_core::{Compiler, DbtError, DbtResult};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::registry::TraceRegistry;
use crate::trace::Trace;

/// Worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Traces accepted into the queue
    pub submitted: u64,
    /// Compilations that produced code
    pub completed: u64,
    /// Compilations the backend rejected
    pub failed: u64,
}

struct Shared<S> {
    queue: Mutex<VecDeque<Arc<Trace<S>>>>,
    available: Condvar,
    shutdown: AtomicBool,
    registry: Arc<TraceRegistry<S>>,
    compiler: Arc<dyn Compiler<S>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Pool of compile worker threads
pub struct BackgroundCompiler<S> {
    shared: Arc<Shared<S>>,
    workers: Vec<JoinHandle<()>>,
}

impl<S: 'static> BackgroundCompiler<S> {
    /// Start `threads` workers compiling into `registry`
    pub fn start(
        registry: Arc<TraceRegistry<S>>,
        compiler: Arc<dyn Compiler<S>>,
        threads: usize,
    ) -> DbtResult<Self> {
        if threads == 0 {
            return Err(DbtError::config("background compiler needs at least one thread"));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            registry,
            compiler,
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("dbt-compile-{id}"))
                .spawn(move || worker_loop(id, &shared))?;
            workers.push(handle);
        }
        debug!("started {} compile workers", threads);

        Ok(Self { shared, workers })
    }

    /// Queue `trace` for compilation. Returns `false` without queueing if
    /// the trace is already compiled, in flight or known to fail.
    pub fn submit(&self, trace: &Arc<Trace<S>>) -> bool {
        if self.shared.shutdown.load(Ordering::Acquire) || !trace.try_claim() {
            return false;
        }
        self.shared.queue.lock().push_back(Arc::clone(trace));
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();
        true
    }

    /// Traces waiting for a worker
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop the workers after their current compilation. Queued traces are
    /// released so they can be compiled again later.
    pub fn shutdown(&mut self) {
        self.stop();
    }
}

impl<S> BackgroundCompiler<S> {
    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        {
            // workers test the flag under the queue lock
            let _queue = self.shared.queue.lock();
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("compile worker panicked");
            }
        }
        for trace in self.shared.queue.lock().drain(..) {
            trace.abandon();
        }
    }
}

impl<S> Drop for BackgroundCompiler<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<S>(id: usize, shared: &Shared<S>) {
    loop {
        let trace = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if let Some(trace) = queue.pop_front() {
                    break trace;
                }
                shared.available.wait(&mut queue);
            }
        };

        match shared.registry.compile_claimed(&trace, shared.compiler.as_ref()) {
            Some(_) => shared.completed.fetch_add(1, Ordering::Relaxed),
            None => shared.failed.fetch_add(1, Ordering::Relaxed),
        };
        debug!("worker {} finished trace at {}", id, trace.start_pc());
    }
}

//! # dbt-engine - execution engine of the dynamic binary translator
//!
//! Decides what guest code runs next and how: by interpreting single
//! instructions, by interpreting cached traces, or by invoking compiled
//! traces once they become hot.
//!
//! ## Main components
//!
//! - [`Trace`] and [`form_trace`]: straight-line instruction runs decoded once
//! - [`TraceRegistry`]: trace cache with at most one compilation per trace
//! - [`CompiledHandle`]: shared compiled code with an obsolete flag
//! - [`ExecutionStrategy`]: the five run-loop policies
//! - [`ExecutionController`]: the run loop, profile load/save and abort
//! - [`ClosureCompiler`]: reference compiler backend
//! - [`BackgroundCompiler`]: compile worker threads
//! - [`SyscallTable`]: number-indexed system call dispatcher

pub mod closure_compiler;
pub mod controller;
pub mod handle;
pub mod interp;
pub mod registry;
pub mod stats;
pub mod strategy;
pub mod syscall_table;
pub mod trace;
pub mod worker;

pub use closure_compiler::{ClosureCode, ClosureCompiler};
pub use controller::{AbortHandle, ExecutionController};
pub use handle::CompiledHandle;
pub use registry::{RegistryStats, TraceRegistry};
pub use stats::ExecutionStats;
pub use strategy::ExecutionStrategy;
pub use syscall_table::{SyscallHandler, SyscallTable};
pub use trace::{CompileState, Trace, form_trace};
pub use worker::{BackgroundCompiler, WorkerStats};

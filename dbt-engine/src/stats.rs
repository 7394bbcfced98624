//! Run-loop statistics

use std::fmt;

/// Counters collected by the run loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Strategy steps taken
    pub steps: u64,
    /// Instructions executed by interpretation
    pub instructions_interpreted: u64,
    /// Traces interpreted start to finish (or left early)
    pub traces_interpreted: u64,
    /// Invocations of compiled code
    pub compiled_invocations: u64,
    /// Compilations started
    pub compilations: u64,
    /// System calls serviced
    pub syscalls: u64,
}

impl ExecutionStats {
    /// Fraction of steps that ran compiled code
    pub fn compiled_ratio(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.compiled_invocations as f64 / self.steps as f64
        }
    }
}

impl fmt::Display for ExecutionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps, {} instructions interpreted in {} traces, {} compiled invocations, \
             {} compilations, {} syscalls",
            self.steps,
            self.instructions_interpreted,
            self.traces_interpreted,
            self.compiled_invocations,
            self.compilations,
            self.syscalls
        )
    }
}

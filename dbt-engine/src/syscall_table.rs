//! Table-driven system call dispatcher

use std::collections::HashMap;

use dbt_core::logging::TARGET_SYSCALL;
use dbt_core::syscall::errno;
use dbt_core::{GuestContext, SyscallArgs, SyscallDispatch, SyscallResult};
use log::{debug, warn};

/// Handler for one system call number
pub type SyscallHandler<S> =
    Box<dyn FnMut(&mut SyscallArgs, &mut GuestContext<S>) -> SyscallResult + Send>;

struct Entry<S> {
    name: &'static str,
    handler: SyscallHandler<S>,
}

/// Dispatches system calls by number. Unknown numbers fail with `ENOSYS`.
pub struct SyscallTable<S> {
    entries: HashMap<i64, Entry<S>>,
    log_calls: bool,
    calls: u64,
    unknown_calls: u64,
}

impl<S> Default for SyscallTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SyscallTable<S> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            log_calls: false,
            calls: 0,
            unknown_calls: 0,
        }
    }

    /// Log every call and its result at debug level
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.log_calls = enabled;
        self
    }

    /// Install `handler` for `number`, replacing any previous one
    pub fn register<F>(&mut self, number: i64, name: &'static str, handler: F) -> &mut Self
    where
        F: FnMut(&mut SyscallArgs, &mut GuestContext<S>) -> SyscallResult + Send + 'static,
    {
        self.entries.insert(
            number,
            Entry {
                name,
                handler: Box::new(handler),
            },
        );
        self
    }

    pub fn is_registered(&self, number: i64) -> bool {
        self.entries.contains_key(&number)
    }

    /// Name registered for `number`
    pub fn name_of(&self, number: i64) -> Option<&'static str> {
        self.entries.get(&number).map(|e| e.name)
    }

    /// Calls dispatched so far, including unknown ones
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn unknown_calls(&self) -> u64 {
        self.unknown_calls
    }
}

impl<S> SyscallDispatch<S> for SyscallTable<S> {
    fn dispatch(
        &mut self,
        call_number: i64,
        args: &mut SyscallArgs,
        ctx: &mut GuestContext<S>,
    ) -> SyscallResult {
        self.calls += 1;
        let Some(entry) = self.entries.get_mut(&call_number) else {
            self.unknown_calls += 1;
            warn!(
                target: TARGET_SYSCALL,
                "unimplemented syscall {} at {}", call_number, ctx.pc
            );
            return SyscallResult::Error(errno::ENOSYS);
        };

        let result = (entry.handler)(args, ctx);
        if self.log_calls {
            debug!(
                target: TARGET_SYSCALL,
                "{}({}) = {:?}", entry.name, call_number, result
            );
        }
        result
    }
}

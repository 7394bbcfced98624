//! System call boundary
//!
//! When an instruction reports [`crate::Effect::Syscall`] the engine stops
//! running guest code, marshals the call through the guest's
//! [`SyscallConvention`] and hands it to a [`SyscallDispatch`]. Failures are
//! written back into guest registers; they never unwind the host.

use log::{debug, trace};

use crate::GuestContext;

/// Outcome of a system call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    /// The call succeeded with the given return value
    Success(i64),
    /// The call failed with the given (positive) errno
    Error(i32),
    /// The call terminated the process
    Exit(i32),
}

/// Linux errno values used by the generic dispatch code
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EINVAL: i32 = 22;
    pub const ENOSYS: i32 = 38;
}

/// Register width of the guest calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgWidth {
    /// One 32-bit register per slot; 64-bit values occupy an aligned
    /// even/odd register pair, low word first
    Bits32,
    /// One 64-bit register per slot
    Bits64,
}

/// Iterates over the arguments of a system call in guest calling-convention
/// order.
#[derive(Debug, Clone)]
pub struct SyscallArgs {
    slots: Vec<u64>,
    width: ArgWidth,
    next: usize,
}

impl SyscallArgs {
    pub fn new(slots: Vec<u64>, width: ArgWidth) -> Self {
        Self {
            slots,
            width,
            next: 0,
        }
    }

    fn next_slot(&mut self) -> u64 {
        let value = self.slots.get(self.next).copied().unwrap_or(0);
        self.next += 1;
        value
    }

    /// Interpret the next argument as a 32-bit integer
    pub fn next_int(&mut self) -> i32 {
        self.next_slot() as u32 as i32
    }

    /// Interpret the next argument as a 64-bit integer
    pub fn next_long(&mut self) -> i64 {
        match self.width {
            ArgWidth::Bits64 => self.next_slot() as i64,
            ArgWidth::Bits32 => {
                // register pairs start on an even register
                if self.next & 1 == 1 {
                    self.next += 1;
                }
                let low = self.next_slot() & 0xffff_ffff;
                let high = self.next_slot() & 0xffff_ffff;
                ((high << 32) | low) as i64
            }
        }
    }

    /// Restart from the first argument
    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Number of argument slots not yet consumed
    pub fn remaining(&self) -> usize {
        self.slots.len().saturating_sub(self.next)
    }
}

impl Iterator for SyscallArgs {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.remaining() == 0 {
            return None;
        }
        let value = self.next_slot();
        Some(match self.width {
            ArgWidth::Bits32 => value & 0xffff_ffff,
            ArgWidth::Bits64 => value,
        })
    }
}

/// How a guest architecture passes system calls in its registers.
/// Implemented by the guest state.
pub trait SyscallConvention {
    /// System call number of the pending call
    fn syscall_number(&self) -> i64;

    /// Arguments of the pending call
    fn syscall_args(&self) -> SyscallArgs;

    /// Store a successful return value
    fn set_syscall_return(&mut self, value: i64);

    /// Store an error; the convention decides the encoding
    /// (negated errno, carry flag, ...)
    fn set_syscall_error(&mut self, errno: i32);
}

/// Services guest system calls
pub trait SyscallDispatch<S> {
    /// Perform call `call_number`.
    ///
    /// The context's `pc` already holds the resume address; a dispatcher that
    /// redirects control flow (signal return, exec) writes a new one.
    fn dispatch(
        &mut self,
        call_number: i64,
        args: &mut SyscallArgs,
        ctx: &mut GuestContext<S>,
    ) -> SyscallResult;
}

impl<S, F> SyscallDispatch<S> for F
where
    F: FnMut(i64, &mut SyscallArgs, &mut GuestContext<S>) -> SyscallResult,
{
    fn dispatch(
        &mut self,
        call_number: i64,
        args: &mut SyscallArgs,
        ctx: &mut GuestContext<S>,
    ) -> SyscallResult {
        self(call_number, args, ctx)
    }
}

/// Marshal the pending call, dispatch it and write the outcome back into the
/// guest.
pub fn service_syscall<S: SyscallConvention>(
    ctx: &mut GuestContext<S>,
    dispatcher: &mut dyn SyscallDispatch<S>,
) -> SyscallResult {
    let number = ctx.state.syscall_number();
    let mut args = ctx.state.syscall_args();
    trace!("syscall {} at {}", number, ctx.pc);

    let result = dispatcher.dispatch(number, &mut args, ctx);
    match result {
        SyscallResult::Success(value) => ctx.state.set_syscall_return(value),
        SyscallResult::Error(errno) => {
            debug!("syscall {} failed with errno {}", number, errno);
            ctx.state.set_syscall_error(errno);
        }
        SyscallResult::Exit(code) => {
            debug!("syscall {} terminated the process with status {}", number, code);
            ctx.finish(code);
        }
    }
    result
}

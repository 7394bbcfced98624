//! Guest process state

use crate::GuestAddr;

/// The emulated process as seen by the execution engine.
///
/// `pc` always denotes the next instruction to execute and is the only cursor
/// the engine advances. Registers and memory live in `state` and are opaque to
/// the engine; only decoders, instructions and system call handlers look
/// inside.
#[derive(Debug, Clone)]
pub struct GuestContext<S> {
    /// Address of the next instruction to execute
    pub pc: GuestAddr,
    /// Guest registers and memory
    pub state: S,
    finished: bool,
    exit_code: Option<i32>,
}

impl<S> GuestContext<S> {
    /// Create a context that will start executing at `entry`
    pub fn new(entry: GuestAddr, state: S) -> Self {
        Self {
            pc: entry,
            state,
            finished: false,
            exit_code: None,
        }
    }

    /// Has the process terminated?
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Terminate the process with the given exit status
    pub fn finish(&mut self, exit_code: i32) {
        self.finished = true;
        self.exit_code = Some(exit_code);
    }

    /// Exit status, once the process has finished through an exit call
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Consume the context, returning the guest state
    pub fn into_state(self) -> S {
        self.state
    }
}

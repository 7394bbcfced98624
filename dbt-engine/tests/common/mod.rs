//! Toy guest architecture for driving the engine in tests
//!
//! Eight 64-bit registers, fixed 4-byte instructions. `r7` is the link
//! register; system calls take their number in `r6`, arguments in `r0..r3`
//! and return in `r0` (negated errno on failure).

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use dbt_core::syscall::errno;
use dbt_core::{
    ArgWidth, CompiledRef, Compiler, DbtError, DbtResult, Decoder, Effect, GuestAddr,
    GuestContext, Instruction, InstructionRef, SyscallArgs, SyscallConvention, SyscallResult,
};
use dbt_engine::{ClosureCompiler, SyscallTable};

pub const BASE: u64 = 0x1000;
pub const LINK: usize = 7;
pub const SYSCALL_NR: usize = 6;

pub const SYS_EXIT: u64 = 1;
pub const SYS_WRITE: u64 = 4;
pub const SYS_GETPID: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// rd = imm
    Li { rd: usize, imm: u64 },
    /// rd = rs + imm
    Addi { rd: usize, rs: usize, imm: i64 },
    /// rd = rs1 + rs2
    Add { rd: usize, rs1: usize, rs2: usize },
    /// pc = target if rs != 0
    Bnez { rs: usize, target: u64 },
    /// pc = target
    Jmp { target: u64 },
    /// pc = rs
    Jr { rs: usize },
    /// r7 = pc + 4; pc = target
    Call { target: u64 },
    /// pc = r7
    Ret,
    /// system call numbered r6
    Syscall,
    /// undecodable
    Bad,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToyState {
    pub regs: [u64; 8],
}

impl SyscallConvention for ToyState {
    fn syscall_number(&self) -> i64 {
        self.regs[SYSCALL_NR] as i64
    }

    fn syscall_args(&self) -> SyscallArgs {
        SyscallArgs::new(self.regs[..4].to_vec(), ArgWidth::Bits64)
    }

    fn set_syscall_return(&mut self, value: i64) {
        self.regs[0] = value as u64;
    }

    fn set_syscall_error(&mut self, errno: i32) {
        self.regs[0] = (-(errno as i64)) as u64;
    }
}

#[derive(Debug)]
pub struct ToyInsn {
    pub op: Op,
}

impl Instruction<ToyState> for ToyInsn {
    fn execute(&self, ctx: &mut GuestContext<ToyState>) -> DbtResult<Effect> {
        let regs = &mut ctx.state.regs;
        match self.op {
            Op::Li { rd, imm } => regs[rd] = imm,
            Op::Addi { rd, rs, imm } => regs[rd] = regs[rs].wrapping_add(imm as u64),
            Op::Add { rd, rs1, rs2 } => regs[rd] = regs[rs1].wrapping_add(regs[rs2]),
            Op::Bnez { rs, target } => {
                ctx.pc = if regs[rs] != 0 {
                    GuestAddr(target)
                } else {
                    ctx.pc + 4
                };
            }
            Op::Jmp { .. } => {}
            Op::Jr { rs } => ctx.pc = GuestAddr(regs[rs]),
            Op::Call { .. } => regs[LINK] = ctx.pc.value() + 4,
            Op::Ret => ctx.pc = GuestAddr(regs[LINK]),
            Op::Syscall => return Ok(Effect::Syscall),
            Op::Bad => return Err(DbtError::bad_instruction(ctx.pc, "bad op executed")),
        }
        Ok(Effect::Continue)
    }

    fn successor(&self, pc: GuestAddr) -> Option<GuestAddr> {
        match self.op {
            Op::Bnez { .. } | Op::Jr { .. } | Op::Ret => None,
            Op::Jmp { target } | Op::Call { target } => Some(GuestAddr(target)),
            _ => Some(pc + 4),
        }
    }
}

/// Decodes from a fixed program image starting at [`BASE`]
#[derive(Debug)]
pub struct ToyDecoder {
    ops: Vec<Op>,
    decodes: AtomicUsize,
}

impl ToyDecoder {
    pub fn new(ops: Vec<Op>) -> Self {
        Self {
            ops,
            decodes: AtomicUsize::new(0),
        }
    }

    /// Number of successful decode calls so far
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::Relaxed)
    }

    pub fn end(&self) -> GuestAddr {
        GuestAddr(BASE + 4 * self.ops.len() as u64)
    }
}

impl Decoder<ToyState> for ToyDecoder {
    fn decode(&self, _state: &ToyState, pc: GuestAddr) -> DbtResult<InstructionRef<ToyState>> {
        let offset = pc.value().wrapping_sub(BASE);
        if pc.value() < BASE || offset % 4 != 0 {
            return Err(DbtError::UnmappedPc { pc });
        }
        let op = *self
            .ops
            .get((offset / 4) as usize)
            .ok_or(DbtError::UnmappedPc { pc })?;
        if op == Op::Bad {
            return Err(DbtError::bad_instruction(pc, "undefined opcode"));
        }
        self.decodes.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(ToyInsn { op }))
    }
}

/// Address of the instruction at `index`
pub fn at(index: u64) -> u64 {
    BASE + 4 * index
}

pub fn context() -> GuestContext<ToyState> {
    GuestContext::new(GuestAddr(BASE), ToyState::default())
}

/// exit(r0)
pub fn exit_sequence() -> Vec<Op> {
    vec![
        Op::Li {
            rd: SYSCALL_NR,
            imm: SYS_EXIT,
        },
        Op::Syscall,
    ]
}

/// `r1 = count; do { r2 += 3; r1 -= 1 } while r1 != 0; exit(r2)`
pub fn counting_loop(count: u64) -> Vec<Op> {
    let mut ops = vec![
        Op::Li { rd: 1, imm: count },
        Op::Li { rd: 2, imm: 0 },
        Op::Addi { rd: 2, rs: 2, imm: 3 },
        Op::Addi { rd: 1, rs: 1, imm: -1 },
        Op::Bnez { rs: 1, target: at(2) },
        Op::Add { rd: 0, rs1: 2, rs2: 3 },
    ];
    ops.extend(exit_sequence());
    ops
}

/// A loop whose body is exactly ten instructions starting at [`BASE`]:
/// eight increments of `r2`, the decrement of `r1` and the back edge.
/// `r1` must be preset to the iteration count.
pub fn ten_instruction_loop() -> Vec<Op> {
    let mut ops = vec![Op::Addi { rd: 2, rs: 2, imm: 1 }; 8];
    ops.push(Op::Addi { rd: 1, rs: 1, imm: -1 });
    ops.push(Op::Bnez { rs: 1, target: BASE });
    ops.push(Op::Add { rd: 0, rs1: 2, rs2: 3 });
    ops.extend(exit_sequence());
    ops
}

/// exit, write and getpid
pub fn syscalls() -> SyscallTable<ToyState> {
    let mut table: SyscallTable<ToyState> = SyscallTable::new();
    table
        .register(SYS_EXIT as i64, "exit", |args, _ctx| {
            SyscallResult::Exit(args.next_int())
        })
        .register(SYS_WRITE as i64, "write", |args, _ctx| {
            let fd = args.next_int();
            let _buf = args.next_long();
            let len = args.next_long();
            if fd == 1 || fd == 2 {
                SyscallResult::Success(len)
            } else {
                SyscallResult::Error(errno::EBADF)
            }
        })
        .register(SYS_GETPID as i64, "getpid", |_args, _ctx| {
            SyscallResult::Success(42)
        });
    table
}

/// Wraps [`ClosureCompiler`], counting compilations and optionally slowing
/// them down
#[derive(Debug, Default)]
pub struct CountingCompiler {
    inner: ClosureCompiler,
    pub compilations: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn rejecting_over(limit: usize) -> Self {
        Self {
            inner: ClosureCompiler::with_limit(limit),
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }
}

impl Compiler<ToyState> for CountingCompiler {
    fn compile(
        &self,
        trace: &[InstructionRef<ToyState>],
        entry_pc: GuestAddr,
    ) -> DbtResult<CompiledRef<ToyState>> {
        self.compilations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.inner.compile(trace, entry_pc)
    }
}

//! Interpreter and compiler equivalence properties
//!
//! Compiled code must leave the guest exactly as interpreting the same trace
//! would, and every strategy must compute the same result.

mod common;

use std::sync::Arc;

use common::*;
use dbt_branch_profile::BranchHistory;
use dbt_core::{Compiler, DbtOptions, GuestAddr, GuestContext, Instruction};
use dbt_engine::interp::{execute_instruction, interpret_trace};
use dbt_engine::{ClosureCompiler, ExecutionController, ExecutionStrategy, TraceRegistry, form_trace};
use proptest::prelude::*;

/// Straight-line arithmetic over r0..r5
fn arithmetic() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..6, any::<u64>()).prop_map(|(rd, imm)| Op::Li { rd, imm }),
        (0usize..6, 0usize..6, any::<i64>()).prop_map(|(rd, rs, imm)| Op::Addi { rd, rs, imm }),
        (0usize..6, 0usize..6, 0usize..6).prop_map(|(rd, rs1, rs2)| Op::Add { rd, rs1, rs2 }),
    ]
}

/// A trace-ending transfer whose target depends on register contents
fn terminator() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..6).prop_map(|rs| Op::Jr { rs }),
        (0usize..6).prop_map(|rs| Op::Bnez { rs, target: BASE }),
    ]
}

fn program() -> impl Strategy<Value = Vec<Op>> {
    (prop::collection::vec(arithmetic(), 1..24), terminator()).prop_map(|(mut ops, last)| {
        ops.push(last);
        ops
    })
}

/// Ops whose next address is known without executing them
fn statically_resolved() -> impl Strategy<Value = Op> {
    prop_oneof![
        arithmetic(),
        (0u64..0x4000).prop_map(|word| Op::Jmp { target: word * 4 }),
        (0u64..0x4000).prop_map(|word| Op::Call { target: word * 4 }),
    ]
}

fn strategies(history: Arc<BranchHistory>) -> Vec<ExecutionStrategy<ToyState>> {
    vec![
        ExecutionStrategy::PureInterpreter,
        ExecutionStrategy::caching(3),
        ExecutionStrategy::profiling(history),
        ExecutionStrategy::staged(6, Arc::new(ClosureCompiler::new())),
        ExecutionStrategy::eager(Arc::new(ClosureCompiler::new())),
    ]
}

// ============================================================================
// Single instructions
// ============================================================================

proptest! {
    /// Executing an op with a static successor leaves pc at that successor
    #[test]
    fn prop_static_successor_is_next_pc(
        op in statically_resolved(),
        word in 0u64..0x4000,
        regs in prop::array::uniform8(any::<u64>()),
    ) {
        let pc = GuestAddr(word * 4);
        let insn = ToyInsn { op };
        let expected = insn.successor(pc);
        prop_assert!(expected.is_some());

        let mut ctx = GuestContext::new(pc, ToyState { regs });
        let was_static = execute_instruction(&insn, &mut ctx, &mut syscalls()).unwrap();
        prop_assert!(was_static);
        prop_assert_eq!(Some(ctx.pc), expected);
        if let Op::Call { .. } = op {
            prop_assert_eq!(ctx.state.regs[LINK], pc.value() + 4);
        }
    }
}

// ============================================================================
// Trace level
// ============================================================================

proptest! {
    /// Invoking the compiled form of a trace matches interpreting it
    #[test]
    fn prop_compiled_trace_matches_interpreted(
        ops in program(),
        regs in prop::array::uniform8(any::<u64>()),
    ) {
        let decoder = ToyDecoder::new(ops.clone());
        let state = ToyState { regs };
        let trace = form_trace(&decoder, &state, GuestAddr(BASE), 1024).unwrap();
        prop_assert_eq!(trace.len(), ops.len());

        let mut interpreted = GuestContext::new(GuestAddr(BASE), state.clone());
        let executed = interpret_trace(&trace, &mut interpreted, &mut syscalls(), None).unwrap();
        prop_assert_eq!(executed, ops.len());

        let code = Compiler::<ToyState>::compile(&ClosureCompiler::new(), &trace, GuestAddr(BASE))
            .unwrap();
        prop_assert_eq!(code.instruction_count(), ops.len());
        let mut compiled = GuestContext::new(GuestAddr(BASE), state);
        let next = code.invoke(&mut compiled, &mut syscalls()).unwrap();

        prop_assert_eq!(next, interpreted.pc);
        prop_assert_eq!(compiled.pc, interpreted.pc);
        prop_assert_eq!(compiled.state, interpreted.state);
    }
}

// ============================================================================
// Whole runs
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every strategy computes the same exit code and registers
    #[test]
    fn prop_strategies_agree(count in 1u64..60) {
        let mut finals = Vec::new();
        for strategy in strategies(Arc::new(BranchHistory::new_global())) {
            let mut controller = ExecutionController::with_strategy(
                strategy,
                ToyDecoder::new(counting_loop(count)),
                Arc::new(TraceRegistry::new(1024)),
                DbtOptions::default(),
            );
            let mut ctx = context();
            controller.run(&mut ctx, &mut syscalls()).unwrap();
            prop_assert_eq!(ctx.exit_code(), Some((3 * count) as i32));
            finals.push(ctx.state);
        }
        for state in &finals[1..] {
            prop_assert_eq!(state, &finals[0]);
        }
    }

    /// The back edge of an n-iteration loop is taken n - 1 times out of n
    #[test]
    fn prop_profiled_back_edge_frequency(count in 1u64..200) {
        let history = Arc::new(BranchHistory::new_global());
        let mut controller = ExecutionController::with_strategy(
            ExecutionStrategy::profiling(Arc::clone(&history)),
            ToyDecoder::new(counting_loop(count)),
            Arc::new(TraceRegistry::new(1024)),
            DbtOptions::default(),
        );
        controller.run(&mut context(), &mut syscalls()).unwrap();

        let branch = GuestAddr(at(4));
        prop_assert_eq!(history.execution_count(branch), count);
        let taken = history.branch_probability(branch, GuestAddr(at(2)));
        let expected = (count - 1) as f32 / count as f32;
        prop_assert!((taken - expected).abs() < 1e-6);
        let fall_through = history.branch_probability(branch, GuestAddr(at(5)));
        prop_assert!((taken + fall_through - 1.0).abs() < 1e-6);
    }
}

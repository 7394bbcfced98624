//! Execution controller tests
//!
//! Strategy selection from options, abort handling and branch profile
//! persistence around a run.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use dbt_branch_profile::BranchHistory;
use dbt_core::{ControllerKind, DbtError, DbtOptions, GuestAddr};
use dbt_engine::{ClosureCompiler, ExecutionController};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn controller(
    options: DbtOptions,
    ops: Vec<Op>,
) -> ExecutionController<ToyState, ToyDecoder> {
    ExecutionController::new(options, ToyDecoder::new(ops), Arc::new(ClosureCompiler::new()))
        .unwrap()
}

fn options_for(kind: ControllerKind) -> DbtOptions {
    DbtOptions {
        controller: kind,
        min_trace_value: 4,
        ..DbtOptions::default()
    }
}

const ALL_KINDS: [ControllerKind; 5] = [
    ControllerKind::Interpreter,
    ControllerKind::Caching,
    ControllerKind::Profiling,
    ControllerKind::Staged,
    ControllerKind::Translator,
];

// ============================================================================
// Construction from options
// ============================================================================

#[cfg(test)]
mod construction_tests {
    use super::*;

    #[test]
    fn test_every_controller_kind_runs() {
        init();
        for kind in ALL_KINDS {
            let mut controller = controller(options_for(kind), counting_loop(7));
            assert_eq!(controller.strategy().kind(), kind);

            let mut ctx = context();
            controller.run(&mut ctx, &mut syscalls()).unwrap();
            assert_eq!(ctx.exit_code(), Some(21), "{kind}");
            assert_eq!(controller.stats().syscalls, 1, "{kind}");
        }
    }

    #[test]
    fn test_options_from_command_line() {
        init();
        let (options, program, rest) = DbtOptions::parse_arguments([
            "-X:dbt:controller=translator",
            "-X:dbt:maxTraceLength=2",
            "toy.bin",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(program.as_deref(), Some("toy.bin"));
        assert_eq!(rest, vec!["--verbose".to_owned()]);

        let mut controller = controller(options, counting_loop(4));
        let mut ctx = context();
        controller.run(&mut ctx, &mut syscalls()).unwrap();
        assert_eq!(ctx.exit_code(), Some(12));
        // two-instruction traces split the five-instruction entry block
        let registry = controller.registry();
        assert_eq!(registry.get(GuestAddr(at(0))).unwrap().len(), 2);
        assert_eq!(registry.get(GuestAddr(at(2))).unwrap().len(), 2);
        assert_eq!(registry.get(GuestAddr(at(4))).unwrap().len(), 1);
    }

    #[test]
    fn test_debug_syscall_option_is_honoured() {
        init();
        let (options, _, _) =
            DbtOptions::parse_arguments(["-X:dbt:debugSyscall=true", "toy.bin"]).unwrap();
        let mut controller = controller(options, counting_loop(2));
        assert!(controller.options().debug_syscall);

        let mut ctx = context();
        controller.run(&mut ctx, &mut syscalls()).unwrap();
        assert_eq!(ctx.exit_code(), Some(6));
        assert_eq!(controller.stats().syscalls, 1);
    }

    #[test]
    fn test_background_compilation_option() {
        init();
        let options = DbtOptions {
            background_compilation: true,
            compiler_threads: 2,
            ..options_for(ControllerKind::Staged)
        };
        let mut controller = controller(options, counting_loop(50));
        assert!(controller.strategy().background().is_some());

        let mut ctx = context();
        controller.run(&mut ctx, &mut syscalls()).unwrap();
        assert_eq!(ctx.exit_code(), Some(150));
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let options = DbtOptions {
            max_trace_length: 0,
            ..DbtOptions::default()
        };
        let result = ExecutionController::new(
            options,
            ToyDecoder::new(counting_loop(1)),
            Arc::new(ClosureCompiler::new()),
        );
        assert!(matches!(result, Err(DbtError::Config { .. })));
    }

    #[test]
    fn test_profiling_controller_exposes_its_history() {
        let mut controller = controller(options_for(ControllerKind::Profiling), counting_loop(4));
        let mut ctx = context();
        controller.run(&mut ctx, &mut syscalls()).unwrap();
        assert_eq!(controller.history().execution_count(GuestAddr(at(4))), 4);
        assert_eq!(
            controller.strategy().history().map(|h| h.site_count()),
            Some(1)
        );
    }
}

// ============================================================================
// Abort
// ============================================================================

#[cfg(test)]
mod abort_tests {
    use super::*;

    #[test]
    fn test_raised_abort_stops_before_first_step() {
        let mut controller = controller(options_for(ControllerKind::Interpreter), counting_loop(3));
        let handle = controller.abort_handle();
        handle.abort("host shutting down");
        handle.abort("second reason is ignored");

        let mut ctx = context();
        let err = controller.run(&mut ctx, &mut syscalls()).unwrap_err();
        match err {
            DbtError::Aborted { reason } => assert_eq!(reason, "host shutting down"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!ctx.is_finished());
        assert_eq!(ctx.pc, GuestAddr(BASE));
        assert_eq!(controller.stats().steps, 0);
    }

    #[test]
    fn test_abort_from_another_thread() {
        init();
        // spins forever
        let ops = vec![Op::Addi { rd: 1, rs: 1, imm: 1 }, Op::Jmp { target: BASE }];
        for kind in [ControllerKind::Interpreter, ControllerKind::Staged] {
            let mut controller = controller(options_for(kind), ops.clone());
            let handle = controller.abort_handle();
            let aborter = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                handle.abort("timeout");
            });

            let mut ctx = context();
            let err = controller.run(&mut ctx, &mut syscalls()).unwrap_err();
            aborter.join().unwrap();
            assert!(matches!(err, DbtError::Aborted { .. }), "{kind}");
            assert!(ctx.state.regs[1] > 0, "{kind}");
        }
    }
}

// ============================================================================
// Profile persistence
// ============================================================================

#[cfg(test)]
mod profile_tests {
    use super::*;

    #[test]
    fn test_profile_saved_after_run_and_loaded_before_next() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counting.json");

        let options = DbtOptions {
            profile_save: Some(path.clone()),
            ..options_for(ControllerKind::Profiling)
        };
        let mut first = controller(options, counting_loop(10));
        first.set_application("counting");
        first.run(&mut context(), &mut syscalls()).unwrap();
        assert!(path.exists());

        let loaded = BranchHistory::new_global();
        let application = loaded.load(&path).unwrap();
        assert_eq!(application.as_deref(), Some("counting"));
        let branch = GuestAddr(at(4));
        assert_eq!(loaded.execution_count(branch), 10);
        assert_eq!(loaded.branch_probability(branch, GuestAddr(at(2))), 0.9);

        let options = DbtOptions {
            profile_load: Some(path.clone()),
            ..options_for(ControllerKind::Profiling)
        };
        let mut second = controller(options, counting_loop(10));
        second.run(&mut context(), &mut syscalls()).unwrap();
        // the loaded observations are kept and extended
        assert_eq!(second.history().execution_count(branch), 20);
    }

    #[test]
    fn test_profile_not_saved_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.json");
        let options = DbtOptions {
            profile_save: Some(path.clone()),
            ..options_for(ControllerKind::Profiling)
        };
        let mut controller = controller(options, vec![Op::Li { rd: 0, imm: 1 }, Op::Bad]);
        assert!(controller.run(&mut context(), &mut syscalls()).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_profile_fails_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let options = DbtOptions {
            profile_load: Some(dir.path().join("missing.json")),
            ..options_for(ControllerKind::Profiling)
        };
        let mut controller = controller(options, counting_loop(3));
        let mut ctx = context();
        let err = controller.run(&mut ctx, &mut syscalls()).unwrap_err();
        assert!(matches!(err, DbtError::Io(_)));
        assert_eq!(ctx.state, ToyState::default());
        assert_eq!(controller.stats().steps, 0);
    }
}

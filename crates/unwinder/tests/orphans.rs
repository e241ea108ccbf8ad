//! Generators dropped while suspended are finalized at the next safe point, and failures
//! during finalization go to the host as unraisable.

mod common;

use common::TestHost;
use pretty_assertions::assert_eq;
use unwinder::{ExcKind, ExecContext, FunctionId, FunctionKind, GeneratorStep, Instr, ProgramBuilder, Runner, Value};

struct Fixture {
    runner: Runner,
    /// `try: yield 1 finally: tick()`
    cleanup: FunctionId,
    /// `try: yield 1 except BaseException: yield 2`
    stubborn: FunctionId,
    /// `try: yield 1 finally: raise UserRaised("cleanup boom")`
    failing: FunctionId,
    /// `log("main")`
    main: FunctionId,
}

fn fixture() -> Fixture {
    let mut program = ProgramBuilder::new();
    let cleanup = program.function("cleanup", FunctionKind::Generator, 0, |b| {
        b.try_finally(
            |b| {
                b.load_const(1);
                b.emit(Instr::Yield);
            },
            |b| {
                b.call_host("tick", 0);
                b.emit(Instr::Pop);
            },
        );
    });
    let stubborn = program.function("stubborn", FunctionKind::Generator, 0, |b| {
        b.try_except(
            ExcKind::BaseException,
            None,
            |b| {
                b.load_const(1);
                b.emit(Instr::Yield);
            },
            |b| {
                b.load_const(2);
                b.emit(Instr::Yield);
            },
        );
    });
    let failing = program.function("failing", FunctionKind::Generator, 0, |b| {
        b.try_finally(
            |b| {
                b.load_const(1);
                b.emit(Instr::Yield);
            },
            |b| b.raise_new(ExcKind::UserRaised, "cleanup boom"),
        );
    });
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.load_const("main");
        b.call_host("log", 1);
        b.emit(Instr::Pop);
    });
    Fixture {
        runner: Runner::new(program.build(main).unwrap()),
        cleanup,
        stubborn,
        failing,
        main,
    }
}

#[test]
fn dropped_generator_runs_its_finally_when_reaped() {
    let f = fixture();
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let generator = f.runner.create_generator(&ctx, f.cleanup, vec![]).unwrap();
    let step = f.runner.advance(&mut ctx, &mut host, &generator).unwrap();
    assert_eq!(step, GeneratorStep::Yielded(Value::Int(1)));

    drop(generator);
    assert_eq!(ctx.pending_orphans(), 1);
    assert_eq!(host.counter, 0);

    f.runner.execution(&mut ctx, &mut host).reap_orphans();
    assert_eq!(ctx.pending_orphans(), 0);
    assert_eq!(host.counter, 1);
    assert!(host.unraisable.is_empty());
    assert_eq!(ctx.handled_depth(), 0);
}

#[test]
fn next_operation_reaps_before_running() {
    let f = fixture();
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let generator = f.runner.create_generator(&ctx, f.cleanup, vec![]).unwrap();
    f.runner.advance(&mut ctx, &mut host, &generator).unwrap();
    drop(generator);

    f.runner.call(&mut ctx, &mut host, f.main, vec![]).unwrap();
    assert_eq!(host.counter, 1);
    assert_eq!(host.log(), ["main"]);
    assert_eq!(ctx.pending_orphans(), 0);
}

#[test]
fn unstarted_and_finished_generators_are_not_orphans() {
    let f = fixture();
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let fresh = f.runner.create_generator(&ctx, f.cleanup, vec![]).unwrap();
    drop(fresh);

    let finished = f.runner.create_generator(&ctx, f.cleanup, vec![]).unwrap();
    f.runner.advance(&mut ctx, &mut host, &finished).unwrap();
    f.runner.close(&mut ctx, &mut host, &finished).unwrap();
    assert_eq!(host.counter, 1);
    drop(finished);

    assert_eq!(ctx.pending_orphans(), 0);
    f.runner.execution(&mut ctx, &mut host).reap_orphans();
    assert_eq!(host.counter, 1);
}

#[test]
fn orphan_that_yields_again_is_reported() {
    let f = fixture();
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let generator = f.runner.create_generator(&ctx, f.stubborn, vec![]).unwrap();
    f.runner.advance(&mut ctx, &mut host, &generator).unwrap();
    drop(generator);
    f.runner.execution(&mut ctx, &mut host).reap_orphans();

    assert_eq!(host.unraisable.len(), 1);
    let reported = &host.unraisable[0];
    assert_eq!(reported.kind(), ExcKind::RuntimeError);
    assert_eq!(reported.message(), Some("generator ignored GeneratorExit"));
    assert_eq!(ctx.handled_depth(), 0);
    assert_eq!(ctx.pending_orphans(), 0);
}

#[test]
fn orphan_cleanup_failure_is_reported_and_not_raised() {
    let f = fixture();
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let generator = f.runner.create_generator(&ctx, f.failing, vec![]).unwrap();
    f.runner.advance(&mut ctx, &mut host, &generator).unwrap();
    drop(generator);

    // the failure surfaces through the host, never through the operation that reaped it
    let result = f.runner.call(&mut ctx, &mut host, f.main, vec![]);
    assert_eq!(result.unwrap(), Value::None);

    assert_eq!(host.unraisable.len(), 1);
    let reported = &host.unraisable[0];
    assert_eq!(reported.message(), Some("cleanup boom"));
    assert_eq!(reported.cause().map(|cause| cause.kind()), Some(ExcKind::GeneratorExit));
    assert_eq!(ctx.handled_depth(), 0);
}

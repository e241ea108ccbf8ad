//! Recursion and operation limits.

mod common;

use common::TestHost;
use pretty_assertions::assert_eq;
use unwinder::{
    DEFAULT_MAX_RECURSION_DEPTH, ExcKind, ExecContext, FunctionId, FunctionKind, Instr, LimitedTracker,
    ProgramBuilder, ResourceLimits, Runner, Value,
};

fn recursion_limit() -> LimitedTracker {
    LimitedTracker::new(ResourceLimits::new().max_recursion_depth(Some(50)))
}

/// `def rec(): return rec()` plus `main` catching `RuntimeError`.
fn recursive_program() -> (Runner, unwinder::FunctionId, unwinder::FunctionId) {
    let mut program = ProgramBuilder::new();
    let rec = program.declare("rec", FunctionKind::Plain, 0);
    program
        .define(rec, |b| {
            b.call(rec, 0);
            b.emit(Instr::Return);
        })
        .unwrap();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        let exc = b.new_local();
        b.try_except(
            ExcKind::RuntimeError,
            Some(exc),
            |b| {
                b.call(rec, 0);
                b.emit(Instr::Pop);
            },
            |b| {
                b.load_local(exc);
                b.emit(Instr::Return);
            },
        );
    });
    (Runner::new(program.build(main).unwrap()), main, rec)
}

/// ```text
/// def rec():
///     try: rec()
///     finally: tick()
///
/// def main():
///     try: rec()
///     except RecursionError: pass
/// ```
fn ticking_recursion() -> (Runner, FunctionId) {
    let mut program = ProgramBuilder::new();
    let rec = program.declare("rec", FunctionKind::Plain, 0);
    program
        .define(rec, |b| {
            b.try_finally(
                |b| {
                    b.call(rec, 0);
                    b.emit(Instr::Pop);
                },
                |b| {
                    b.call_host("tick", 0);
                    b.emit(Instr::Pop);
                },
            );
        })
        .unwrap();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.try_except(
            ExcKind::RecursionError,
            None,
            |b| {
                b.call(rec, 0);
                b.emit(Instr::Pop);
            },
            |_| {},
        );
    });
    (Runner::new(program.build(main).unwrap()), rec)
}

/// `countdown(n)`: recurses `n` times inside try/finally, then raises `UserRaised`.
/// `main(n)` catches it.
fn countdown_program() -> (Runner, FunctionId) {
    let mut program = ProgramBuilder::new();
    let countdown = program.declare("countdown", FunctionKind::Plain, 1);
    program
        .define(countdown, |b| {
            b.load_const(0);
            b.load_local(0);
            b.emit(Instr::Lt);
            let bottom = b.emit_jump(Instr::JumpIfFalse { target: 0 });
            b.try_finally(
                |b| {
                    b.load_local(0);
                    b.load_const(1);
                    b.emit(Instr::Sub);
                    b.call(countdown, 1);
                    b.emit(Instr::Pop);
                },
                |b| {
                    b.call_host("tick", 0);
                    b.emit(Instr::Pop);
                },
            );
            b.load_const(());
            b.emit(Instr::Return);
            b.patch_jump(bottom);
            b.raise_new(ExcKind::UserRaised, "bottom");
        })
        .unwrap();
    let main = program.function("main", FunctionKind::Plain, 1, |b| {
        let exc = b.new_local();
        b.try_except(
            ExcKind::UserRaised,
            Some(exc),
            |b| {
                b.load_local(0);
                b.call(countdown, 1);
                b.emit(Instr::Pop);
            },
            |b| {
                b.load_local(exc);
                b.emit(Instr::Return);
            },
        );
    });
    (Runner::new(program.build(main).unwrap()), main)
}

#[test]
fn default_limit_runs_every_finally_below_it() {
    let (runner, _) = ticking_recursion();
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let result = runner.run(&mut ctx, &mut host).unwrap();

    assert_eq!(result, Value::None);
    // main holds one of the frames, so rec runs one level fewer than the limit
    assert_eq!(host.counter, (DEFAULT_MAX_RECURSION_DEPTH - 1) as i64);
    assert_eq!(ctx.handled_depth(), 0);
    assert!(ctx.in_flight().is_none());
}

#[test]
fn uncaught_recursion_at_default_limit_keeps_full_traceback() {
    let (runner, rec) = ticking_recursion();
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let exc = runner.call(&mut ctx, &mut host, rec, vec![]).unwrap_err();

    assert_eq!(exc.kind(), ExcKind::RecursionError);
    assert_eq!(host.counter, DEFAULT_MAX_RECURSION_DEPTH as i64);
    let traceback = exc.traceback();
    assert_eq!(traceback.len(), DEFAULT_MAX_RECURSION_DEPTH);
    assert!(traceback.iter().all(|frame| frame.function() == "rec"));
    assert_eq!(ctx.handled_depth(), 0);
}

#[test]
fn unlimited_depth_does_not_grow_the_native_stack() {
    const DEPTH: i64 = 50_000;

    // frames live on the heap, so a small native stack is enough
    let outcome = std::thread::Builder::new()
        .stack_size(512 * 1024)
        .spawn(|| {
            let (runner, main) = countdown_program();
            let mut host = TestHost::new();
            let mut ctx = ExecContext::new();
            let tracker = LimitedTracker::new(ResourceLimits::new().max_recursion_depth(None));

            let result = runner
                .execution(&mut ctx, &mut host)
                .with_tracker(tracker)
                .call(main, vec![Value::Int(DEPTH)])
                .unwrap();
            let Value::Exception(exc) = result else {
                panic!("main should return the caught exception");
            };
            (host.counter, exc.traceback().len(), ctx.handled_depth())
        })
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(outcome, (DEPTH, DEPTH as usize + 2, 0));
}

#[test]
fn runaway_recursion_raises_catchable_recursion_error() {
    let (runner, _, _) = recursive_program();
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let mut execution = runner.execution(&mut ctx, &mut host).with_tracker(recursion_limit());
    let Value::Exception(exc) = execution.run().unwrap() else {
        panic!("main should return the caught RecursionError");
    };
    drop(execution);

    assert_eq!(exc.kind(), ExcKind::RecursionError);
    assert_eq!(exc.message(), Some("maximum recursion depth exceeded"));
    assert_eq!(ctx.handled_depth(), 0);
}

#[test]
fn uncaught_recursion_error_has_one_entry_per_frame() {
    let (runner, _, rec) = recursive_program();
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let mut execution = runner.execution(&mut ctx, &mut host).with_tracker(recursion_limit());
    let exc = execution.call(rec, vec![]).unwrap_err();
    drop(execution);

    assert_eq!(exc.kind(), ExcKind::RecursionError);
    assert_eq!(exc.traceback().len(), 50);
    assert!(ctx.in_flight().is_some_and(|in_flight| in_flight.ptr_eq(&exc)));
}

/// ```text
/// def main():
///     try:
///         try:
///             while True: pass
///         finally: tick()
///     except BaseException: tick()
/// ```
#[test]
fn exhausted_budget_skips_handlers_and_cleanups() {
    let mut program = ProgramBuilder::new();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.try_except(
            ExcKind::BaseException,
            None,
            |b| {
                b.try_finally(
                    |b| {
                        let start = b.current_offset();
                        b.emit(Instr::Nop);
                        b.emit_jump_to(Instr::Jump { target: 0 }, start);
                    },
                    |b| {
                        b.call_host("tick", 0);
                        b.emit(Instr::Pop);
                    },
                );
            },
            |b| {
                b.call_host("tick", 0);
                b.emit(Instr::Pop);
            },
        );
    });
    let runner = Runner::new(program.build(main).unwrap());
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let tracker = LimitedTracker::new(ResourceLimits::new().max_operations(100));
    let exc = runner
        .execution(&mut ctx, &mut host)
        .with_tracker(tracker)
        .run()
        .unwrap_err();

    assert_eq!(exc.kind(), ExcKind::TimeoutError);
    assert_eq!(exc.message(), Some("operation limit exceeded: 101 > 100"));
    assert_eq!(host.counter, 0);
    assert_eq!(ctx.handled_depth(), 0);
    assert!(ctx.in_flight().is_some_and(|in_flight| in_flight.ptr_eq(&exc)));
}

#[test]
fn budget_inside_generator_loop_reports_the_unrun_cleanup() {
    // def gen(): try: while True: yield 1 finally: tick()
    // def main(): for _ in gen(): pass
    let mut program = ProgramBuilder::new();
    let generator = program.function("gen", FunctionKind::Generator, 0, |b| {
        b.try_finally(
            |b| {
                let start = b.current_offset();
                b.load_const(1);
                b.emit(Instr::Yield);
                b.emit_jump_to(Instr::Jump { target: 0 }, start);
            },
            |b| {
                b.call_host("tick", 0);
                b.emit(Instr::Pop);
            },
        );
    });
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.call(generator, 0);
        b.for_each(None, |_| {});
    });
    let runner = Runner::new(program.build(main).unwrap());
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let tracker = LimitedTracker::new(ResourceLimits::new().max_operations(200));
    let exc = runner
        .execution(&mut ctx, &mut host)
        .with_tracker(tracker)
        .run()
        .unwrap_err();

    assert_eq!(exc.kind(), ExcKind::TimeoutError);
    assert_eq!(host.counter, 0);
    assert_eq!(ctx.pending_orphans(), 0);
    // the abandoned generator was finalized after the fact, but the budget was already gone
    assert_eq!(host.unraisable.len(), 1);
    assert_eq!(host.unraisable[0].kind(), ExcKind::TimeoutError);
}

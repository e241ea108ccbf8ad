//! Finally bodies along a chain of calls run innermost first, before the outer catch.

mod common;

use common::TestHost;
use pretty_assertions::assert_eq;
use unwinder::{ExcKind, ExecContext, FunctionId, FunctionKind, Instr, Program, ProgramBuilder, Runner, Value};

/// ```text
/// def level(n):
///     if not 0 < n: raise UserRaised("deep")
///     try: level(n - 1)
///     finally: tick(); log(n)
///
/// def main(d):
///     try: level(d)
///     except UserRaised: log("caught")
/// ```
fn program() -> (Program, FunctionId, FunctionId) {
    let mut program = ProgramBuilder::new();
    let level = program.declare("level", FunctionKind::Plain, 1);
    program
        .define(level, |b| {
            b.load_const(0);
            b.load_local(0);
            b.emit(Instr::Lt);
            let base = b.emit_jump(Instr::JumpIfFalse { target: 0 });
            b.try_finally(
                |b| {
                    b.load_local(0);
                    b.load_const(1);
                    b.emit(Instr::Sub);
                    b.call(level, 1);
                    b.emit(Instr::Pop);
                },
                |b| {
                    b.call_host("tick", 0);
                    b.emit(Instr::Pop);
                    b.load_local(0);
                    b.call_host("log", 1);
                    b.emit(Instr::Pop);
                },
            );
            b.load_const(());
            b.emit(Instr::Return);
            b.patch_jump(base);
            b.raise_new(ExcKind::UserRaised, "deep");
        })
        .unwrap();
    let main = program.function("main", FunctionKind::Plain, 1, |b| {
        b.try_except(
            ExcKind::UserRaised,
            None,
            |b| {
                b.load_local(0);
                b.call(level, 1);
                b.emit(Instr::Pop);
            },
            |b| {
                b.load_const("caught");
                b.call_host("log", 1);
                b.emit(Instr::Pop);
            },
        );
    });
    (program.build(main).unwrap(), main, level)
}

#[test]
fn each_depth_runs_every_finally_once_innermost_first() {
    let (program, main, _) = program();
    let runner = Runner::new(program);

    for depth in 0..6_i64 {
        let mut host = TestHost::new();
        let mut ctx = ExecContext::new();
        let result = runner.call(&mut ctx, &mut host, main, vec![Value::Int(depth)]).unwrap();
        assert_eq!(result, Value::None);

        assert_eq!(host.counter, depth, "one increment per finally at depth {depth}");
        let mut expected: Vec<String> = (1..=depth).map(|n| n.to_string()).collect();
        expected.push("caught".to_owned());
        assert_eq!(host.log, expected);
        assert!(ctx.in_flight().is_none());
        assert_eq!(ctx.handled_depth(), 0);
    }
}

#[test]
fn uncaught_exception_collects_one_traceback_entry_per_frame() {
    let (program, _, level) = program();
    let runner = Runner::new(program);
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let exc = runner.call(&mut ctx, &mut host, level, vec![Value::Int(3)]).unwrap_err();
    assert_eq!(exc.kind(), ExcKind::UserRaised);
    assert_eq!(exc.message(), Some("deep"));
    assert_eq!(host.counter, 3);

    let traceback = exc.traceback();
    assert_eq!(traceback.len(), 4);
    assert!(traceback.iter().all(|frame| frame.function() == "level"));
    assert!(ctx.in_flight().is_some_and(|in_flight| in_flight.ptr_eq(&exc)));
}

#[test]
fn report_renders_traceback_and_summary() {
    let (program, _, level) = program();
    let runner = Runner::new(program);
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let exc = runner.call(&mut ctx, &mut host, level, vec![Value::Int(1)]).unwrap_err();
    let report = exc.report();
    assert_eq!(report.summary(), "UserRaised: deep");
    let rendered = report.to_string();
    assert!(rendered.starts_with("Traceback (most recent call last):\n"));
    assert!(rendered.ends_with("UserRaised: deep"));
}

//! Tracers observe raises, catches and scope traffic in the order the VM performs them.

mod common;

use common::TestHost;
use pretty_assertions::assert_eq;
use unwinder::{
    ExcKind, ExecContext, FunctionKind, GeneratorState, Instr, ProfilingTracer, ProgramBuilder, RecordingTracer,
    Runner, ScopeKind, TraceEvent,
};

#[test]
fn structural_trace_of_a_caught_raise() {
    let mut program = ProgramBuilder::new();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.try_except(ExcKind::UserRaised, None, |b| b.raise_new(ExcKind::UserRaised, "X"), |_| {});
    });
    let runner = Runner::new(program.build(main).unwrap());
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let mut execution = runner
        .execution(&mut ctx, &mut host)
        .with_tracer(RecordingTracer::structural());
    execution.run().unwrap();
    let events = execution.into_tracer().into_events();

    assert_eq!(
        events,
        vec![
            TraceEvent::Call {
                func_name: "main".to_owned(),
                depth: 1
            },
            TraceEvent::ScopePush {
                kind: ScopeKind::Except,
                scope_depth: 1
            },
            TraceEvent::Raise {
                kind: ExcKind::UserRaised,
                depth: 1
            },
            TraceEvent::ScopePop {
                kind: ScopeKind::Except,
                unwinding: true
            },
            TraceEvent::Catch {
                kind: ExcKind::UserRaised,
                depth: 1
            },
            TraceEvent::ScopePush {
                kind: ScopeKind::Handling,
                scope_depth: 1
            },
            TraceEvent::ScopePop {
                kind: ScopeKind::Handling,
                unwinding: false
            },
            TraceEvent::Return { depth: 0 },
        ]
    );
}

#[test]
fn profiling_counts_cleanups_run_while_unwinding() {
    // with mgr (suppressing): try: raise X finally: tick()
    let mut program = ProgramBuilder::new();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.load_const("mgr");
        b.call_host("open", 1);
        b.with_block(None, |b| {
            b.try_finally(
                |b| b.raise_new(ExcKind::UserRaised, "X"),
                |b| {
                    b.call_host("tick", 0);
                    b.emit(Instr::Pop);
                },
            );
        });
    });
    let runner = Runner::new(program.build(main).unwrap());
    let mut host = TestHost {
        suppress: true,
        ..TestHost::new()
    };
    let mut ctx = ExecContext::new();

    let mut execution = runner.execution(&mut ctx, &mut host).with_tracer(ProfilingTracer::new());
    execution.run().unwrap();
    let report = execution.tracer().report();

    assert_eq!(report.raises, 1);
    assert_eq!(report.catches, 0);
    assert_eq!(report.suppressions, 1);
    assert_eq!(report.unwind_cleanups, 2);
    assert_eq!(report.total_calls, 1);
    assert_eq!(report.max_depth, 1);
    assert_eq!(host.counter, 1);
}

#[test]
fn generator_state_changes_are_traced() {
    let mut program = ProgramBuilder::new();
    let generator = program.function("gen", FunctionKind::Generator, 0, |b| {
        b.load_const(1);
        b.emit(Instr::Yield);
    });
    let runner = Runner::new(program.build(generator).unwrap());
    let mut host = TestHost::new();
    let mut ctx = ExecContext::new();

    let mut execution = runner
        .execution(&mut ctx, &mut host)
        .with_tracer(RecordingTracer::structural());
    let handle = execution.create_generator(generator, vec![]).unwrap();
    execution.advance(&handle).unwrap();
    execution.advance(&handle).unwrap();
    let transitions: Vec<(GeneratorState, GeneratorState)> = execution
        .into_tracer()
        .into_events()
        .into_iter()
        .filter_map(|event| match event {
            TraceEvent::Generator { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();

    assert_eq!(
        transitions,
        [
            (GeneratorState::Fresh, GeneratorState::Running),
            (GeneratorState::Running, GeneratorState::Suspended),
            (GeneratorState::Suspended, GeneratorState::Running),
            (GeneratorState::Running, GeneratorState::Completed),
        ]
    );
}

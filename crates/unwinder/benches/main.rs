// Use codspeed-criterion-compat when running on CodSpeed (CI), real criterion otherwise (for flamegraphs)
use std::borrow::Cow;

#[cfg(codspeed)]
use codspeed_criterion_compat::{Bencher, Criterion, black_box, criterion_group, criterion_main};
#[cfg(not(codspeed))]
use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};
use unwinder::{
    ExcKind, ExceptionRef, ExecContext, FunctionKind, Host, Instr, ManagerRef, ProgramBuilder, Runner, Value,
};

/// Counts `counter_inc` calls and hands out the shared exception `e`.
struct BenchHost {
    counter: i64,
    shared: ExceptionRef,
}

impl Host for BenchHost {
    fn call(&mut self, name: &str, _args: &[Value]) -> Result<Value, ExceptionRef> {
        match name {
            "counter_inc" => {
                self.counter += 1;
                Ok(Value::None)
            }
            "open" => Ok(Value::Manager(ManagerRef::host("quiet", Value::None))),
            "quiet.__enter__" => Ok(Value::None),
            "quiet.__exit__" => Ok(Value::Bool(true)),
            _ => Err(unwinder::unknown_host_function(name)),
        }
    }

    fn resolve(&mut self, name: &str) -> Option<Value> {
        (name == "e").then(|| Value::Exception(self.shared.clone()))
    }

    fn print(&mut self, _output: Cow<'_, str>) -> Result<(), ExceptionRef> {
        Ok(())
    }
}

/// `wrapper(n)` nests `n` finally bodies around a loop over a generator that raises the
/// shared exception after its first yield; `main(depth)` catches it.
fn finally_wrapper_runner() -> Runner {
    let mut program = ProgramBuilder::new();
    let gtor = program.function("gtor", FunctionKind::Generator, 0, |b| {
        b.load_const(1);
        b.emit(Instr::Yield);
        b.resolve("e");
        b.emit(Instr::Raise);
    });
    let wrapper = program.declare("wrapper", FunctionKind::Plain, 1);
    program
        .define(wrapper, |b| {
            b.load_local(0);
            let base = b.emit_jump(Instr::JumpIfFalse { target: 0 });
            b.try_finally(
                |b| {
                    b.load_local(0);
                    b.load_const(1);
                    b.emit(Instr::Sub);
                    b.call(wrapper, 1);
                    b.emit(Instr::Pop);
                },
                |b| {
                    b.call_host("counter_inc", 0);
                    b.emit(Instr::Pop);
                },
            );
            b.load_const(());
            b.emit(Instr::Return);
            b.patch_jump(base);
            b.call(gtor, 0);
            b.for_each(None, |_| {});
        })
        .unwrap();
    let main = program.function("main", FunctionKind::Plain, 1, |b| {
        b.try_except(
            ExcKind::Exception,
            None,
            |b| {
                b.load_local(0);
                b.call(wrapper, 1);
                b.emit(Instr::Pop);
            },
            |_| {},
        );
    });
    Runner::new(program.build(main).unwrap())
}

/// `main()` raises inside a `with` block whose `exit` suppresses it.
fn suppressed_with_runner() -> Runner {
    let mut program = ProgramBuilder::new();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.call_host("open", 0);
        b.with_block(None, |b| b.raise_new(ExcKind::UserRaised, "swallowed"));
    });
    Runner::new(program.build(main).unwrap())
}

fn run_finally_wrapper(bench: &mut Bencher, depth: i64) {
    let runner = finally_wrapper_runner();
    let mut host = BenchHost {
        counter: 0,
        shared: ExceptionRef::new(ExcKind::Exception, "bad wrong"),
    };
    let mut ctx = ExecContext::new();
    let r = call_main(&runner, &mut ctx, &mut host, depth);
    assert_eq!(r, Value::None);
    assert_eq!(host.counter, depth);

    bench.iter(|| {
        let r = call_main(&runner, &mut ctx, &mut host, depth);
        black_box(r);
    });
}

fn run_suppressed_with(bench: &mut Bencher) {
    let runner = suppressed_with_runner();
    let mut host = BenchHost {
        counter: 0,
        shared: ExceptionRef::new(ExcKind::Exception, "unused"),
    };
    let mut ctx = ExecContext::new();
    assert_eq!(runner.run(&mut ctx, &mut host).unwrap(), Value::None);

    bench.iter(|| {
        let r = runner.run(&mut ctx, &mut host).unwrap();
        black_box(r);
    });
}

fn call_main(runner: &Runner, ctx: &mut ExecContext, host: &mut BenchHost, depth: i64) -> Value {
    let entry = runner.program().entry();
    runner.call(ctx, host, entry, vec![Value::Int(depth)]).unwrap()
}

/// Configures the exception benchmark group.
fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("finally_wrapper_depth_0", |b| run_finally_wrapper(b, 0));
    c.bench_function("finally_wrapper_depth_10", |b| run_finally_wrapper(b, 10));
    c.bench_function("suppressed_with", run_suppressed_with);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

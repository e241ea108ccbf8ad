//! Bundled harness programs and the host they run against.

use std::{
    borrow::Cow,
    io::{self, Write as _},
};

use unwinder::{
    BuildError, CodeBuilder, ExcKind, ExceptionRef, FunctionId, FunctionKind, Host, Instr, ManagerRef,
    ProgramBuilder, Runner, Value, unknown_host_function,
};

/// Calls wrapped in a finally body per benchmark iteration.
pub const WRAPPER_DEPTH: i64 = 10;
/// Plain calls stacked above the wrappers.
pub const RECURSE_DEPTH: i64 = 0;
pub const DEFAULT_ITERATIONS: i64 = 100_000;

/// A program ready to run, plus the call that starts it.
pub struct Scenario {
    pub runner: Runner,
    pub entry: FunctionId,
    pub args: Vec<Value>,
}

/// Builds the scenario called `name`.
pub fn build(name: &str, iterations: i64) -> Result<Scenario, String> {
    let built = match name {
        "exceptions-bench" => exceptions_bench(iterations),
        "with-class-raise" => with_class_raise(),
        "with-import" => with_import(),
        other => return Err(format!("unknown scenario '{other}'")),
    };
    built.map_err(|err| format!("failed to build '{name}': {err}"))
}

/// Host shared by every scenario.
///
/// `counter_inc()` bumps `counter`, `ContextManager()` returns a manager that prints on
/// enter and exit, and `open(path)` returns a silent manager. `Resolve` knows the
/// module `sys` and the shared exception `e`.
///
/// Output goes to stdout unless the host was made with [`ScenarioHost::capturing`].
pub struct ScenarioHost {
    pub counter: i64,
    shared: ExceptionRef,
    output: Option<Vec<String>>,
}

impl ScenarioHost {
    pub fn new() -> Self {
        Self {
            counter: 0,
            shared: ExceptionRef::new(ExcKind::Exception, "bad wrong"),
            output: None,
        }
    }

    /// A host that keeps its output lines instead of printing them.
    #[cfg(test)]
    pub fn capturing() -> Self {
        Self {
            output: Some(Vec::new()),
            ..Self::new()
        }
    }

    #[cfg(test)]
    pub fn output(&self) -> &[String] {
        self.output.as_deref().unwrap_or_default()
    }

    fn emit(&mut self, line: &str) -> Result<(), ExceptionRef> {
        match &mut self.output {
            Some(output) => {
                output.push(line.to_owned());
                Ok(())
            }
            None => writeln!(io::stdout().lock(), "{line}")
                .map_err(|err| ExceptionRef::new(ExcKind::RuntimeError, err.to_string())),
        }
    }
}

impl Default for ScenarioHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for ScenarioHost {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ExceptionRef> {
        match name {
            "counter_inc" => {
                self.counter += 1;
                Ok(Value::None)
            }
            "ContextManager" => Ok(Value::Manager(ManagerRef::host("ContextManager", Value::None))),
            "ContextManager.__enter__" => {
                self.emit("entered")?;
                Ok(Value::None)
            }
            "ContextManager.__exit__" => {
                self.emit("exited")?;
                Ok(Value::None)
            }
            "open" => {
                let path = args.first().cloned().unwrap_or_default();
                Ok(Value::Manager(ManagerRef::host("file", path)))
            }
            "file.__enter__" => Ok(args.first().cloned().unwrap_or_default()),
            "file.__exit__" => Ok(Value::Bool(false)),
            _ => Err(unknown_host_function(name)),
        }
    }

    fn resolve(&mut self, name: &str) -> Option<Value> {
        match name {
            "sys" => Some(Value::from("sys")),
            "e" => Some(Value::Exception(self.shared.clone())),
            _ => None,
        }
    }

    fn print(&mut self, output: Cow<'_, str>) -> Result<(), ExceptionRef> {
        self.emit(&output)
    }

    fn report_unraisable(&mut self, exc: &ExceptionRef) {
        eprintln!("Exception ignored in generator finalizer:\n{}", exc.report());
    }
}

/// `if not n: jump` with `n` in local 0.
fn branch_on_zero(b: &mut CodeBuilder) -> unwinder::JumpLabel {
    b.load_local(0);
    b.emit_jump(Instr::JumpIfFalse { target: 0 })
}

fn decrement_arg(b: &mut CodeBuilder) {
    b.load_local(0);
    b.load_const(1);
    b.emit(Instr::Sub);
}

/// ```text
/// e = Exception("bad wrong")
///
/// def gtor():
///     yield 1
///     raise e
///     yield 2
///
/// def wrapper(n):
///     if n:
///         try: wrapper(n - 1)
///         finally: counter_inc()
///     else:
///         for x in gtor(): pass
///
/// def recurser(n):
///     if n: return recurser(n - 1)
///     return wrapper(WRAPPER_DEPTH)
///
/// def f(niters):
///     i = 0
///     while i < niters:
///         try: recurser(RECURSE_DEPTH)
///         except Exception: pass
///         i = i + 1
/// ```
fn exceptions_bench(iterations: i64) -> Result<Scenario, BuildError> {
    let mut program = ProgramBuilder::new();
    let gtor = program.function("gtor", FunctionKind::Generator, 0, |b| {
        b.load_const(1);
        b.emit(Instr::Yield);
        b.resolve("e");
        b.emit(Instr::Raise);
        b.load_const(2);
        b.emit(Instr::Yield);
    });

    let wrapper = program.declare("wrapper", FunctionKind::Plain, 1);
    program.define(wrapper, |b| {
        let base = branch_on_zero(b);
        b.try_finally(
            |b| {
                decrement_arg(b);
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
    })?;

    let recurser = program.declare("recurser", FunctionKind::Plain, 1);
    program.define(recurser, |b| {
        let base = branch_on_zero(b);
        decrement_arg(b);
        b.call(recurser, 1);
        b.emit(Instr::Return);
        b.patch_jump(base);
        b.load_const(WRAPPER_DEPTH);
        b.call(wrapper, 1);
        b.emit(Instr::Return);
    })?;

    let f = program.function("f", FunctionKind::Plain, 1, |b| {
        let i = b.new_local();
        b.load_const(0);
        b.store_local(i);
        let loop_start = b.current_offset();
        b.load_local(i);
        b.load_local(0);
        b.emit(Instr::Lt);
        let done = b.emit_jump(Instr::JumpIfFalse { target: 0 });
        b.try_except(
            ExcKind::Exception,
            None,
            |b| {
                b.load_const(RECURSE_DEPTH);
                b.call(recurser, 1);
                b.emit(Instr::Pop);
            },
            |_| {},
        );
        b.load_local(i);
        b.load_const(1);
        b.emit(Instr::Add);
        b.store_local(i);
        b.emit_jump_to(Instr::Jump { target: 0 }, loop_start);
        b.patch_jump(done);
    });

    Ok(Scenario {
        runner: Runner::new(program.build(f)?),
        entry: f,
        args: vec![Value::Int(iterations)],
    })
}

/// ```text
/// def f():
///     with ContextManager():
///         class C: raise Exception("an exception")
///
/// try: f()
/// except Exception as e: print(e)
/// ```
fn with_class_raise() -> Result<Scenario, BuildError> {
    let mut program = ProgramBuilder::new();
    let class_body = program.function("C", FunctionKind::ClassBody, 0, |b| {
        b.raise_new(ExcKind::Exception, "an exception");
    });
    let f = program.function("f", FunctionKind::Plain, 0, |b| {
        b.call_host("ContextManager", 0);
        b.with_block(None, |b| {
            b.emit(Instr::BuildClass { body: class_body });
            b.emit(Instr::Pop);
        });
    });
    let main = program.function("main", FunctionKind::Plain, 0, |b| print_caught(b, ExcKind::Exception, f));
    Ok(Scenario {
        runner: Runner::new(program.build(main)?),
        entry: main,
        args: Vec::new(),
    })
}

/// ```text
/// def f():
///     with open("/dev/null"): import noexiste
///
/// def f2():
///     with open("/dev/null"): from sys import nonesuch
///
/// try: f()
/// except UnresolvedReference as e: print(e)
/// try: f2()
/// except UnresolvedReference as e: print(e)
/// ```
fn with_import() -> Result<Scenario, BuildError> {
    fn guarded_resolve(program: &mut ProgramBuilder, name: &str, target: &str) -> FunctionId {
        program.function(name, FunctionKind::Plain, 0, |b| {
            b.load_const("/dev/null");
            b.call_host("open", 1);
            b.with_block(None, |b| {
                b.resolve(target);
                b.emit(Instr::Pop);
            });
        })
    }

    let mut program = ProgramBuilder::new();
    let f = guarded_resolve(&mut program, "f", "noexiste");
    let f2 = guarded_resolve(&mut program, "f2", "sys.nonesuch");
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        print_caught(b, ExcKind::UnresolvedReference, f);
        print_caught(b, ExcKind::UnresolvedReference, f2);
    });
    Ok(Scenario {
        runner: Runner::new(program.build(main)?),
        entry: main,
        args: Vec::new(),
    })
}

/// `try: func() except kind as e: print(e)`
fn print_caught(b: &mut CodeBuilder, kind: ExcKind, func: FunctionId) {
    let caught = b.new_local();
    b.try_except(
        kind,
        Some(caught),
        |b| {
            b.call(func, 0);
            b.emit(Instr::Pop);
        },
        |b| {
            b.load_local(caught);
            b.emit(Instr::Print);
        },
    );
}

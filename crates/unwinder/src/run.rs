//! Public interface for running unwinder programs.

use serde::{Deserialize, Serialize};

use crate::{
    bytecode::{Code, VM, make_generator},
    context::ExecContext,
    exception_private::{ExceptionRef, RunResult},
    function::Function,
    host::Host,
    intern::FunctionId,
    resource::{NoLimitTracker, ResourceTracker},
    tracer::{NoopTracer, VmTracer},
    types::{GeneratorRef, GeneratorStep},
    value::Value,
};

/// A complete program: a function table and the entry point `Runner::run` calls.
///
/// Built with [`ProgramBuilder`](crate::ProgramBuilder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    functions: Vec<Function>,
    entry: FunctionId,
}

impl Program {
    pub(crate) fn new(functions: Vec<Function>, entry: FunctionId) -> Self {
        Self { functions, entry }
    }

    pub(crate) fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    #[must_use]
    pub fn entry(&self) -> FunctionId {
        self.entry
    }

    /// Looks up a function by name. If several share a name the first one wins.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|function| &*function.name == name)
            .and_then(|index| u32::try_from(index).ok())
            .map(FunctionId::from_index)
    }

    #[must_use]
    pub fn function_name(&self, id: FunctionId) -> Option<&str> {
        self.function(id).map(|function| &*function.name)
    }

    /// Returns the code object of a function, for inspection and disassembly.
    #[must_use]
    pub fn code(&self, id: FunctionId) -> Option<&Code> {
        self.function(id).map(|function| &function.code)
    }

    /// Number of functions in the program.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// One configured execution of a program on an [`ExecContext`].
///
/// Holds the resource tracker and tracer across operations, so limits and trace events
/// accumulate over a sequence of runs, calls and generator operations.
///
/// Every operation leaves the context's in-flight slot empty on success and holding the
/// escaped exception on failure.
///
/// # Example
/// ```
/// use unwinder::{CollectStringHost, ExecContext, FunctionKind, ProgramBuilder, Runner, Value};
///
/// let mut program = ProgramBuilder::new();
/// let main = program.function("main", FunctionKind::Plain, 0, |b| {
///     b.load_const(41);
///     b.load_const(1);
///     b.emit(unwinder::Instr::Add);
///     b.emit(unwinder::Instr::Return);
/// });
/// let runner = Runner::new(program.build(main).unwrap());
///
/// let mut ctx = ExecContext::new();
/// let mut host = CollectStringHost::new();
/// let value = runner.execution(&mut ctx, &mut host).run().unwrap();
/// assert_eq!(value, Value::Int(42));
/// ```
pub struct Execution<'a, H: Host, T: ResourceTracker = NoLimitTracker, Tr: VmTracer = NoopTracer> {
    program: &'a Program,
    ctx: &'a mut ExecContext,
    host: &'a mut H,
    tracker: T,
    tracer: Tr,
}

impl<'a, H: Host> Execution<'a, H> {
    fn new(program: &'a Program, ctx: &'a mut ExecContext, host: &'a mut H) -> Self {
        Self {
            program,
            ctx,
            host,
            tracker: NoLimitTracker,
            tracer: NoopTracer,
        }
    }
}

impl<'a, H: Host, T: ResourceTracker, Tr: VmTracer> Execution<'a, H, T, Tr> {
    /// Replaces the resource tracker.
    #[must_use]
    pub fn with_tracker<T2: ResourceTracker>(self, tracker: T2) -> Execution<'a, H, T2, Tr> {
        Execution {
            program: self.program,
            ctx: self.ctx,
            host: self.host,
            tracker,
            tracer: self.tracer,
        }
    }

    /// Replaces the tracer.
    #[must_use]
    pub fn with_tracer<Tr2: VmTracer>(self, tracer: Tr2) -> Execution<'a, H, T, Tr2> {
        Execution {
            program: self.program,
            ctx: self.ctx,
            host: self.host,
            tracker: self.tracker,
            tracer,
        }
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    #[must_use]
    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Runs the program's entry function.
    ///
    /// # Errors
    /// Returns the exception that escaped the entry function.
    pub fn run(&mut self) -> Result<Value, ExceptionRef> {
        let entry = self.program.entry();
        self.drive(|vm| vm.call_entry(entry, Vec::new()))
    }

    /// Calls any function of the program. Calling a generator function returns a fresh
    /// generator.
    ///
    /// # Errors
    /// Returns the exception that escaped the function, or a `TypeError` for a wrong
    /// number of arguments.
    pub fn call(&mut self, func: FunctionId, args: Vec<Value>) -> Result<Value, ExceptionRef> {
        self.drive(|vm| vm.call_entry(func, args))
    }

    /// Creates a generator from a generator function without running it.
    ///
    /// # Errors
    /// Returns a `TypeError` if `func` is not a generator function or the argument count
    /// does not match.
    pub fn create_generator(&mut self, func: FunctionId, args: Vec<Value>) -> Result<GeneratorRef, ExceptionRef> {
        make_generator(self.program, self.ctx.orphan_queue(), func, args).map_err(|err| err.into_exception())
    }

    /// Resumes a generator until its next yield or its end.
    ///
    /// # Errors
    /// Returns the exception raised by the body, `GeneratorExhausted` if the generator
    /// already finished, or a `RuntimeError` if it is running.
    pub fn advance(&mut self, generator: &GeneratorRef) -> Result<GeneratorStep, ExceptionRef> {
        self.drive(|vm| vm.resume_generator(generator, None))
    }

    /// Raises `exc` inside a generator at its suspension point.
    ///
    /// # Errors
    /// Returns `exc` (or whatever replaced it) if the body does not catch it, or `exc`
    /// itself if the generator has not started or already finished.
    pub fn throw(&mut self, generator: &GeneratorRef, exc: ExceptionRef) -> Result<GeneratorStep, ExceptionRef> {
        self.drive(|vm| vm.resume_generator(generator, Some(exc)))
    }

    /// Closes a generator, running its pending cleanups. Closing twice does nothing.
    ///
    /// # Errors
    /// Returns an exception raised by a cleanup, or a `RuntimeError` if the body
    /// yielded instead of finishing.
    pub fn close(&mut self, generator: &GeneratorRef) -> Result<(), ExceptionRef> {
        self.drive(|vm| vm.close_generator(generator))
    }

    /// Finalizes suspended generators whose last handle was dropped.
    ///
    /// Operations already do this before and after they run; this is for harnesses that
    /// drop generators between operations and want the cleanups to run right away.
    pub fn reap_orphans(&mut self) {
        // Reaping reports failures as unraisable, so the result is always Ok.
        let _ = self.drive(|vm| {
            vm.reap_orphans();
            Ok(())
        });
    }

    fn drive<R>(&mut self, op: impl FnOnce(&mut VM<'_, T, H, Tr>) -> RunResult<R>) -> Result<R, ExceptionRef> {
        self.ctx.clear_in_flight();
        let mut vm = VM::new(self.program, &mut *self.ctx, &mut self.tracker, &mut *self.host, &mut self.tracer);
        vm.reap_orphans();
        let result = op(&mut vm);
        vm.reap_orphans();
        drop(vm);

        match result {
            Ok(value) => {
                self.ctx.clear_in_flight();
                Ok(value)
            }
            Err(err) => {
                let exc = err.into_exception();
                self.ctx.set_in_flight(exc.clone());
                Err(exc)
            }
        }
    }
}

/// Primary interface for running unwinder programs.
///
/// A `Runner` owns an immutable [`Program`]. Each operation takes the execution path's
/// [`ExecContext`] and the [`Host`] by `&mut`, so any number of independent contexts can
/// run the same program. For resource limits or tracing use [`Runner::execution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    program: Program,
}

impl Runner {
    #[must_use]
    pub fn new(program: Program) -> Self {
        Self { program }
    }

    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Starts an execution with no resource limits beyond the default recursion depth
    /// and no tracing.
    pub fn execution<'a, H: Host>(&'a self, ctx: &'a mut ExecContext, host: &'a mut H) -> Execution<'a, H> {
        Execution::new(&self.program, ctx, host)
    }

    /// Runs the program's entry function.
    ///
    /// # Errors
    /// Returns the exception that escaped the entry function.
    pub fn run(&self, ctx: &mut ExecContext, host: &mut impl Host) -> Result<Value, ExceptionRef> {
        self.execution(ctx, host).run()
    }

    /// Calls a function of the program with `args`.
    ///
    /// # Errors
    /// Returns the exception that escaped the function.
    pub fn call(
        &self,
        ctx: &mut ExecContext,
        host: &mut impl Host,
        func: FunctionId,
        args: Vec<Value>,
    ) -> Result<Value, ExceptionRef> {
        self.execution(ctx, host).call(func, args)
    }

    /// Creates a generator on `ctx` without running any of its body.
    ///
    /// # Errors
    /// Returns a `TypeError` if `func` is not a generator function or the argument count
    /// does not match.
    pub fn create_generator(
        &self,
        ctx: &ExecContext,
        func: FunctionId,
        args: Vec<Value>,
    ) -> Result<GeneratorRef, ExceptionRef> {
        make_generator(&self.program, ctx.orphan_queue(), func, args).map_err(|err| err.into_exception())
    }

    /// See [`Execution::advance`].
    ///
    /// # Errors
    /// Returns the exception raised by the generator or the protocol error.
    pub fn advance(
        &self,
        ctx: &mut ExecContext,
        host: &mut impl Host,
        generator: &GeneratorRef,
    ) -> Result<GeneratorStep, ExceptionRef> {
        self.execution(ctx, host).advance(generator)
    }

    /// See [`Execution::close`].
    ///
    /// # Errors
    /// Returns an exception raised by a cleanup, or the ignored-exit `RuntimeError`.
    pub fn close(&self, ctx: &mut ExecContext, host: &mut impl Host, generator: &GeneratorRef) -> Result<(), ExceptionRef> {
        self.execution(ctx, host).close(generator)
    }

    /// See [`Execution::throw`].
    ///
    /// # Errors
    /// Returns the thrown exception if it was not caught.
    pub fn throw(
        &self,
        ctx: &mut ExecContext,
        host: &mut impl Host,
        generator: &GeneratorRef,
        exc: ExceptionRef,
    ) -> Result<GeneratorStep, ExceptionRef> {
        self.execution(ctx, host).throw(generator, exc)
    }

    /// Serializes the runner to a binary format.
    ///
    /// The serialized data can be stored and later restored with `load()`.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a runner from binary format.
    ///
    /// # Arguments
    /// * `bytes` - The serialized runner data from `dump()`
    ///
    /// # Errors
    /// Returns an error if deserialization fails.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

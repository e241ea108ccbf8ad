//! Virtual machine for executing code objects.
//!
//! Frames live on a heap-allocated frame stack and one dispatch loop runs whichever frame
//! is on top, so bytecode recursion never grows the native stack. Every frame pushed on
//! the stack is an [`Activation`] that records what the frame below does with its outcome:
//! push the return value, bind a `with` target, resume the unwind that called an `exit`,
//! and so on. An exception leaving a frame is delivered to the frame below, which unwinds
//! its own scope stack in turn. Cleanups therefore run innermost first within a frame and
//! inner frame before outer frame.
//!
//! # Module Structure
//!
//! - `frame` - Activation records
//! - `scope` - Per-frame scope stack and the unwind reason (`Why`)
//! - `exceptions` - Raising, catching and unwinding
//! - `generator` - Generator advance/close/throw, iteration and orphan finalization
//! - `with` - Context manager enter/exit dispatch

mod exceptions;
mod frame;
mod generator;
mod scope;
mod with;

use std::{borrow::Cow, mem, rc::Rc};

pub(crate) use frame::Frame;
pub(crate) use generator::make_generator;
pub use scope::ScopeKind;
use scope::{ScopeEntry, Why};

use crate::{
    bytecode::{Code, Instr},
    context::ExecContext,
    exception_private::{ExcKind, ExceptionRef, RunError, RunResult},
    function::{Function, FunctionKind},
    host::Host,
    intern::{FunctionId, NameId},
    resource::ResourceTracker,
    run::Program,
    tracer::VmTracer,
    types::{Callable, GeneratorRef, GeneratorState, ManagerRef},
    value::Value,
};

/// How a frame stopped running.
#[derive(Debug)]
pub(crate) enum FrameExit {
    /// The body returned (explicitly or by running off the end) after all cleanups ran.
    Return(Value),
    /// A generator body suspended at `Yield`.
    Yield(Value),
}

/// What a finished frame hands to the frame below it.
type Outcome = RunResult<FrameExit>;

/// What the frame below an activation does with the activation's outcome.
#[derive(Debug)]
enum Then {
    /// Started by a harness operation; the outcome leaves the VM.
    Harness,
    /// `Call`: push the return value.
    Value,
    /// `BuildClass`: push the class name instead of the body's return value.
    ClassName(Rc<str>),
    /// `enter` of a `with` block: register the pending `exit`, then push the entered value.
    Entered {
        manager: ManagerRef,
        target: usize,
        stack_depth: usize,
    },
    /// `exit` of a `with` block left normally.
    Discard,
    /// `exit` called while unwinding for `why`. A truthy result suppresses and resumes at `target`.
    ExitUnwinding { why: Why, target: usize },
    /// `ForIter`: push the yielded value, or end the loop at `target`.
    Iterate { target: u32 },
    /// `GeneratorExit` thrown in by a close. `why` resumes afterwards if the close was
    /// part of an unwind; `saved` is the in-flight slot to restore.
    Close {
        generator: GeneratorRef,
        why: Option<Why>,
        saved: Option<ExceptionRef>,
    },
    /// Finalization of a generator dropped while suspended.
    Orphan {
        name: Rc<str>,
        saved: Option<ExceptionRef>,
    },
}

/// A frame on the frame stack.
#[derive(Debug)]
struct Activation {
    frame: Frame,
    /// The generator that owns `frame` between resumptions.
    generator: Option<GeneratorRef>,
    /// Raised at the frame's current instruction before it executes anything.
    throw: Option<ExceptionRef>,
    then: Then,
}

impl Activation {
    fn new(frame: Frame, then: Then) -> Self {
        Self {
            frame,
            generator: None,
            throw: None,
            then,
        }
    }
}

/// What the dispatch loop does next.
enum Flow {
    /// Execute the current frame's next instruction.
    Next,
    /// Route an error into the current frame's scope stack.
    Fail(RunError),
    /// Carry on unwinding the current frame.
    Unwind(Why),
    /// Run a new frame on top of the current one.
    Call(Box<Activation>),
    /// The current frame is finished.
    Exit(Outcome),
}

/// A bytecode call after its checks passed.
enum Callee {
    Frame(Frame),
    /// Nothing to run: calling a generator function just creates the generator.
    Ready(Value),
}

/// The virtual machine.
///
/// Borrows everything it works on; a VM lives for one harness operation
/// (run, call, advance, close, throw).
pub(crate) struct VM<'a, T: ResourceTracker, H: Host, Tr: VmTracer> {
    program: &'a Program,
    ctx: &'a mut ExecContext,
    tracker: &'a mut T,
    host: &'a mut H,
    tracer: &'a mut Tr,
    /// Callers of the running frame, innermost last.
    frames: Vec<Activation>,
    /// Number of frames currently executing, the running one included.
    depth: usize,
}

impl<'a, T: ResourceTracker, H: Host, Tr: VmTracer> VM<'a, T, H, Tr> {
    pub fn new(
        program: &'a Program,
        ctx: &'a mut ExecContext,
        tracker: &'a mut T,
        host: &'a mut H,
        tracer: &'a mut Tr,
    ) -> Self {
        Self {
            program,
            ctx,
            tracker,
            host,
            tracer,
            frames: Vec::new(),
            depth: 0,
        }
    }

    /// Calls a function from outside any frame.
    pub fn call_entry(&mut self, func_id: FunctionId, args: Vec<Value>) -> RunResult<Value> {
        let frame = match self.prepare_call(func_id, args)? {
            Callee::Frame(frame) => frame,
            Callee::Ready(value) => return Ok(value),
        };
        match self.run(Activation::new(frame, Then::Harness)).1? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => Err(RunError::internal("non-generator frame suspended")),
        }
    }

    fn function(&self, func_id: FunctionId) -> RunResult<&'a Function> {
        let program: &'a Program = self.program;
        program
            .function(func_id)
            .ok_or_else(|| RunError::internal(format!("unknown function id {}", func_id.index())))
    }

    /// Checks a bytecode call and builds the callee's frame.
    fn prepare_call(&mut self, func_id: FunctionId, args: Vec<Value>) -> RunResult<Callee> {
        let function = self.function(func_id)?;
        function.check_arity(args.len()).map_err(ExcKind::type_error)?;
        if function.kind == FunctionKind::Generator {
            let generator = generator::new_generator(self.ctx, func_id, function, args);
            return Ok(Callee::Ready(Value::Generator(generator)));
        }
        self.tracker.check_recursion_depth(self.depth)?;
        Ok(Callee::Frame(Frame::new(func_id, function, args)))
    }

    /// Calls a bytecode function for `caller`; the result reaches `caller` through `then`.
    fn call_function(&mut self, caller: &mut Frame, func_id: FunctionId, args: Vec<Value>, then: Then) -> Flow {
        match self.prepare_call(func_id, args) {
            Ok(Callee::Frame(frame)) => Flow::Call(Box::new(Activation::new(frame, then))),
            Ok(Callee::Ready(value)) => self.deliver(caller, then, Ok(FrameExit::Return(value))),
            Err(err) => self.deliver(caller, then, Err(err)),
        }
    }

    /// Calls a manager callable. Host callables complete immediately.
    fn call(&mut self, caller: &mut Frame, callable: &Callable, args: Vec<Value>, then: Then) -> Flow {
        match callable {
            Callable::Function(func_id) => self.call_function(caller, *func_id, args, then),
            Callable::Host(name) => {
                let outcome = self
                    .host
                    .call(name, &args)
                    .map(FrameExit::Return)
                    .map_err(RunError::Raise);
                self.deliver(caller, then, outcome)
            }
        }
    }

    /// Runs `base` and every frame it calls until `base` finishes.
    ///
    /// Returns `base`'s continuation along with its outcome, since no frame below `base`
    /// is running on this VM.
    fn run(&mut self, base: Activation) -> (Then, Outcome) {
        let floor = self.frames.len();
        let (mut current, mut flow) = self.enter(base);
        loop {
            flow = match flow {
                Flow::Next => match self.next_orphan() {
                    Some(orphan) => Flow::Call(Box::new(orphan)),
                    None => self.step(&mut current.frame).unwrap_or_else(Flow::Fail),
                },
                Flow::Fail(err) => self.handle_error(&mut current.frame, err),
                Flow::Unwind(why) => self.unwind(&mut current.frame, why),
                Flow::Call(callee) => {
                    let (callee, flow) = self.enter(*callee);
                    self.frames.push(mem::replace(&mut current, callee));
                    flow
                }
                Flow::Exit(outcome) => {
                    let caller = if self.frames.len() > floor {
                        self.frames.pop()
                    } else {
                        None
                    };
                    let (then, outcome) = self.leave(current, outcome);
                    let Some(caller) = caller else {
                        return (then, outcome);
                    };
                    current = caller;
                    self.deliver(&mut current.frame, then, outcome)
                }
            };
        }
    }

    /// Makes `activation` the running frame.
    fn enter(&mut self, mut activation: Activation) -> (Activation, Flow) {
        // Handlers the body was inside when it suspended are active again.
        for exc in activation.frame.scopes.handled_exceptions() {
            self.ctx.push_handled(exc.clone());
        }
        self.depth += 1;
        self.tracer.on_call(&activation.frame.name, self.depth);
        let flow = match activation.throw.take() {
            Some(exc) => Flow::Fail(RunError::Raise(exc)),
            None => Flow::Next,
        };
        (activation, flow)
    }

    /// Retires the running frame. A suspended generator gets its frame back.
    fn leave(&mut self, activation: Activation, outcome: Outcome) -> (Then, Outcome) {
        let Activation {
            frame, generator, then, ..
        } = activation;
        self.depth -= 1;
        self.tracer.on_return(self.depth);

        let suspended = matches!(outcome, Ok(FrameExit::Yield(_)));
        if suspended {
            self.stash_handled(&frame);
        }
        if let Some(generator) = generator {
            let mut state = generator.borrow_mut();
            if suspended {
                state.frame = Some(frame);
                self.set_state(&mut state, GeneratorState::Suspended);
            } else {
                self.set_state(&mut state, GeneratorState::Completed);
            }
        }
        (then, outcome)
    }

    /// Hands a finished frame's outcome to the frame that was waiting for it.
    fn deliver(&mut self, caller: &mut Frame, then: Then, outcome: Outcome) -> Flow {
        match then {
            Then::Harness => Flow::Fail(RunError::internal("harness frame finished below the top")),
            Then::Value => match returned(caller, outcome) {
                Ok(value) => {
                    caller.push(value);
                    Flow::Next
                }
                Err(err) => Flow::Fail(err),
            },
            Then::ClassName(name) => match returned(caller, outcome) {
                Ok(_) => {
                    caller.push(Value::Str(name));
                    Flow::Next
                }
                Err(err) => Flow::Fail(err),
            },
            Then::Entered {
                manager,
                target,
                stack_depth,
            } => match returned(caller, outcome) {
                Ok(entered) => {
                    let entry = ScopeEntry::ContextManager {
                        manager,
                        target,
                        stack_depth,
                    };
                    self.push_scope(caller, entry);
                    caller.push(entered);
                    Flow::Next
                }
                Err(err) => Flow::Fail(err),
            },
            Then::Discard => match returned(caller, outcome) {
                Ok(_) => Flow::Next,
                Err(err) => Flow::Fail(err),
            },
            Then::ExitUnwinding { why, target } => {
                if why.exception().is_some() {
                    self.ctx.pop_handled();
                }
                match returned(caller, outcome) {
                    Ok(result) => self.exit_returned(caller, why, target, result.is_truthy()),
                    Err(err) => self.supersede(caller, why, err),
                }
            }
            Then::Iterate { target } => match outcome {
                Ok(FrameExit::Yield(value)) => {
                    caller.push(value);
                    Flow::Next
                }
                Ok(FrameExit::Return(_)) => match self.end_iteration(caller, target) {
                    Ok(()) => Flow::Next,
                    Err(err) => Flow::Fail(err),
                },
                Err(err) => Flow::Fail(leave_call(err, caller)),
            },
            Then::Close { generator, why, saved } => {
                let result = self.close_result(&generator, outcome.map_err(|err| leave_call(err, caller)));
                self.ctx.restore_in_flight(saved);
                self.after_close(caller, why, result)
            }
            Then::Orphan { name, saved } => {
                self.orphan_done(&name, saved, outcome);
                Flow::Next
            }
        }
    }

    fn push_scope(&mut self, frame: &mut Frame, entry: ScopeEntry) {
        let kind = entry.kind();
        frame.scopes.push(entry);
        self.tracer.on_scope_push(kind, frame.scopes.len());
    }

    /// Executes one instruction.
    fn step(&mut self, frame: &mut Frame) -> RunResult<Flow> {
        let code = &self.function(frame.func_id)?.code;
        let Some(instr) = code.instr(frame.ip) else {
            // Running off the end is an implicit `return None`.
            return Ok(Flow::Unwind(Why::Returning(Value::None)));
        };
        self.tracker.check_time()?;
        self.tracer
            .on_instruction(frame.ip, instr.opcode(), frame.stack.len(), self.depth);
        frame.ip += 1;

        match instr {
            Instr::Nop => {}
            Instr::LoadConst(idx) => {
                let value = code
                    .konst(*idx)
                    .ok_or_else(|| RunError::internal(format!("constant {idx} out of range")))?
                    .to_value();
                frame.push(value);
            }
            Instr::LoadLocal(slot) => {
                let value = frame.local(*slot)?;
                frame.push(value);
            }
            Instr::StoreLocal(slot) => {
                let value = frame.pop()?;
                frame.set_local(*slot, value)?;
            }
            Instr::Pop => {
                frame.pop()?;
            }
            Instr::Dup => {
                let value = frame.peek()?.clone();
                frame.push(value);
            }
            Instr::Add | Instr::Sub | Instr::Lt => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.push(binary_op(instr, &lhs, &rhs)?);
            }
            Instr::Not => {
                let value = frame.pop()?;
                frame.push(Value::Bool(!value.is_truthy()));
            }
            Instr::Jump { target } => frame.jump(*target),
            Instr::JumpIfFalse { target } => {
                if !frame.pop()?.is_truthy() {
                    frame.jump(*target);
                }
            }
            Instr::Call { func, argc } => {
                let args = frame.pop_n(usize::from(*argc))?;
                return Ok(self.call_function(frame, *func, args, Then::Value));
            }
            Instr::CallHost { name, argc } => {
                let name = code_name(code, *name)?;
                let args = frame.pop_n(usize::from(*argc))?;
                let value = self.host.call(name, &args)?;
                frame.push(value);
            }
            Instr::BuildClass { body } => {
                let function = self.function(*body)?;
                if function.kind != FunctionKind::ClassBody {
                    return Err(RunError::internal(format!("'{}' is not a class body", function.name)));
                }
                let then = Then::ClassName(function.name.clone());
                return Ok(self.call_function(frame, *body, Vec::new(), then));
            }
            Instr::Return => {
                let value = frame.stack.pop().unwrap_or_default();
                return Ok(Flow::Unwind(Why::Returning(value)));
            }
            Instr::Yield => {
                if !frame.is_generator() {
                    return Err(RunError::internal(format!("yield in non-generator '{}'", frame.name)));
                }
                return Ok(Flow::Exit(Ok(FrameExit::Yield(frame.pop()?))));
            }
            Instr::Print => {
                let value = frame.pop()?;
                self.host.print(Cow::Owned(value.to_string()))?;
            }
            Instr::MakeException(kind) => {
                let exc = match frame.pop()? {
                    Value::None => ExceptionRef::new_none(*kind),
                    message => ExceptionRef::new(*kind, message.to_string()),
                };
                frame.push(Value::Exception(exc));
            }
            Instr::Raise => return Err(raise_value(frame.pop()?)),
            Instr::RaiseChained => {
                let message = frame.pop()?;
                let exc = ExceptionRef::new(ExcKind::Chained, message.to_string());
                exc.set_cause(self.ctx.current_handled().cloned());
                return Err(RunError::Raise(exc));
            }
            Instr::Reraise => return Err(self.reraise()),
            Instr::ExceptionMatches(kind) => {
                let matches = frame.peek()?.as_exception().is_some_and(|exc| exc.matches(*kind));
                frame.push(Value::Bool(matches));
            }
            Instr::SetField(name) => {
                let name = code_name(code, *name)?;
                let value = frame.pop()?;
                let target = frame.pop()?;
                expect_exception(&target)?.set_field(name.to_string(), value);
            }
            Instr::GetField(name) => {
                let name = code_name(code, *name)?;
                let target = frame.pop()?;
                let exc = expect_exception(&target)?;
                let value = exc.field(name).ok_or_else(|| {
                    ExceptionRef::new(
                        ExcKind::UnresolvedReference,
                        format!("'{}' object has no field '{name}'", exc.kind()),
                    )
                })?;
                frame.push(value);
            }
            Instr::SetupExcept { kind, target } => {
                let entry = ScopeEntry::Except {
                    kind: *kind,
                    target: *target as usize,
                    stack_depth: frame.stack.len(),
                };
                self.push_scope(frame, entry);
            }
            Instr::SetupFinally { target } => {
                let entry = ScopeEntry::Finally {
                    target: *target as usize,
                    stack_depth: frame.stack.len(),
                };
                self.push_scope(frame, entry);
            }
            Instr::PopScope => return self.pop_scope(frame),
            Instr::PopExcept => self.pop_except(frame)?,
            Instr::EndFinally => return self.end_finally(frame),
            Instr::MakeManager { enter, exit } => {
                let state = frame.pop()?;
                let name = self.function(*enter)?.name.clone();
                let manager = ManagerRef::new(name, Callable::Function(*enter), Callable::Function(*exit), state);
                frame.push(Value::Manager(manager));
            }
            Instr::EnterWith { target } => return self.enter_with(frame, *target),
            Instr::GetIter => self.get_iter(frame)?,
            Instr::ForIter { target } => return self.for_iter(frame, *target),
            Instr::Resolve(name) => {
                let name = code_name(code, *name)?;
                let value = self.resolve(name)?;
                frame.push(value);
            }
        }
        Ok(Flow::Next)
    }

    /// Resolves `module` or `module.attr` through the host.
    fn resolve(&mut self, name: &str) -> RunResult<Value> {
        match name.rsplit_once('.') {
            None => self.host.resolve(name).ok_or_else(|| ExcKind::no_module(name)),
            Some((module, attr)) => {
                if self.host.resolve(module).is_none() {
                    return Err(ExcKind::no_module(module));
                }
                self.host.resolve(name).ok_or_else(|| ExcKind::cannot_import(attr))
            }
        }
    }
}

/// Unpacks the outcome of a call that must return.
fn returned(caller: &Frame, outcome: Outcome) -> RunResult<Value> {
    match outcome {
        Ok(FrameExit::Return(value)) => Ok(value),
        Ok(FrameExit::Yield(_)) => Err(RunError::internal("non-generator frame suspended")),
        Err(err) => Err(leave_call(err, caller)),
    }
}

/// Appends the caller's position to an exception leaving a call.
///
/// Fresh raises that never entered the callee (bad arity, recursion limit, host
/// functions) are left alone; the caller positions them at the call instruction.
fn leave_call(err: RunError, caller: &Frame) -> RunError {
    if let RunError::Propagate(exc) = &err {
        exc.push_traceback(caller.here());
    }
    err
}

fn code_name(code: &Code, id: NameId) -> RunResult<&Rc<str>> {
    code.name(id)
        .ok_or_else(|| RunError::internal(format!("name {} out of range", id.index())))
}

fn raise_value(value: Value) -> RunError {
    match value {
        Value::Exception(exc) => RunError::Raise(exc),
        other => ExcKind::type_error(format!(
            "exceptions must derive from BaseException, not '{}'",
            other.type_name()
        )),
    }
}

fn expect_exception(value: &Value) -> RunResult<&ExceptionRef> {
    value
        .as_exception()
        .ok_or_else(|| ExcKind::type_error(format!("'{}' object has no fields", value.type_name())))
}

fn binary_op(instr: &Instr, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    let (Value::Int(a), Value::Int(b)) = (lhs, rhs) else {
        let op = match instr {
            Instr::Add => "+",
            Instr::Sub => "-",
            _ => "<",
        };
        return Err(ExcKind::type_error(format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            lhs.type_name(),
            rhs.type_name()
        )));
    };
    let result = match instr {
        Instr::Add => a.checked_add(*b).map(Value::Int),
        Instr::Sub => a.checked_sub(*b).map(Value::Int),
        Instr::Lt => Some(Value::Bool(a < b)),
        _ => return Err(RunError::internal("binary_op called with a non-binary instruction")),
    };
    result.ok_or_else(|| ExcKind::runtime_error("integer overflow"))
}

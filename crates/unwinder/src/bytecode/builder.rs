//! Builders for assembling code objects and programs.
//!
//! `CodeBuilder` emits instructions, handles forward jumps with patching, and offers
//! structured helpers (`try_finally`, `try_except`, `with_block`, `for_each`) that lay out
//! the scope instructions in the shape the VM expects. `ProgramBuilder` collects functions
//! into a `Program`, with separate declaration so bodies can refer to themselves.

use std::{fmt, rc::Rc};

use super::{
    code::{Code, Const},
    op::Instr,
};
use crate::{
    exception_private::ExcKind,
    function::{Function, FunctionKind},
    intern::{FunctionId, Interns, NameId},
    run::Program,
};

/// Builder for emitting instructions into a code object.
///
/// # Usage
///
/// ```ignore
/// let mut builder = CodeBuilder::new();
/// builder.load_const(1);
/// let jump = builder.emit_jump(Instr::JumpIfFalse { target: 0 });
/// // ... emit more code ...
/// builder.patch_jump(jump);
/// let code = builder.build();
/// ```
#[derive(Debug, Default)]
pub struct CodeBuilder {
    instrs: Vec<Instr>,
    consts: Vec<Const>,
    names: Interns,
    /// Number of local slots allocated so far, parameters included.
    num_locals: u16,
}

/// A forward jump waiting for its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct JumpLabel(usize);

impl CodeBuilder {
    /// Creates a new empty CodeBuilder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder whose first `arity` local slots hold the parameters.
    #[must_use]
    pub fn with_params(arity: u16) -> Self {
        Self {
            num_locals: arity,
            ..Self::default()
        }
    }

    pub fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Emits a forward jump instruction, returning a label to patch later.
    ///
    /// # Panics
    ///
    /// Panics if `instr` has no jump target.
    pub fn emit_jump(&mut self, mut instr: Instr) -> JumpLabel {
        *instr.target_mut().expect("emit_jump requires an instruction with a target") = 0;
        let label = JumpLabel(self.instrs.len());
        self.instrs.push(instr);
        label
    }

    /// Patches a forward jump to point to the next instruction emitted.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.offset_u32(self.instrs.len());
        if let Some(slot) = self.instrs.get_mut(label.0).and_then(Instr::target_mut) {
            *slot = target;
        }
    }

    /// Emits a jump to a known target offset, typically a loop start.
    ///
    /// # Panics
    ///
    /// Panics if `instr` has no jump target.
    pub fn emit_jump_to(&mut self, mut instr: Instr, target: usize) {
        let target = self.offset_u32(target);
        *instr.target_mut().expect("emit_jump_to requires an instruction with a target") = target;
        self.instrs.push(instr);
    }

    /// Returns the offset of the next instruction.
    ///
    /// Use this to record loop start positions for backward jumps.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.instrs.len()
    }

    /// Adds a constant to the pool and returns its index.
    ///
    /// # Panics
    ///
    /// Panics if the pool exceeds 65535 entries.
    pub fn add_const(&mut self, value: impl Into<Const>) -> u16 {
        let idx = u16::try_from(self.consts.len()).expect("constant pool exceeds u16 range");
        self.consts.push(value.into());
        idx
    }

    /// Interns a name for `CallHost`, `SetField`, `GetField` or `Resolve`.
    pub fn name(&mut self, name: &str) -> NameId {
        self.names.intern(name)
    }

    /// Allocates a fresh local slot.
    ///
    /// # Panics
    ///
    /// Panics if the function needs more than 65535 locals.
    pub fn new_local(&mut self) -> u16 {
        let slot = self.num_locals;
        self.num_locals = slot.checked_add(1).expect("too many locals");
        slot
    }

    pub fn load_const(&mut self, value: impl Into<Const>) {
        let idx = self.add_const(value);
        self.emit(Instr::LoadConst(idx));
    }

    pub fn load_local(&mut self, slot: u16) {
        self.emit(Instr::LoadLocal(slot));
    }

    pub fn store_local(&mut self, slot: u16) {
        self.emit(Instr::StoreLocal(slot));
    }

    pub fn call(&mut self, func: FunctionId, argc: u8) {
        self.emit(Instr::Call { func, argc });
    }

    pub fn call_host(&mut self, name: &str, argc: u8) {
        let name = self.name(name);
        self.emit(Instr::CallHost { name, argc });
    }

    pub fn resolve(&mut self, name: &str) {
        let name = self.name(name);
        self.emit(Instr::Resolve(name));
    }

    pub fn set_field(&mut self, name: &str) {
        let name = self.name(name);
        self.emit(Instr::SetField(name));
    }

    pub fn get_field(&mut self, name: &str) {
        let name = self.name(name);
        self.emit(Instr::GetField(name));
    }

    /// Pushes a new exception of `kind`, with an optional message.
    pub fn new_exception(&mut self, kind: ExcKind, message: Option<&str>) {
        match message {
            Some(message) => self.load_const(message),
            None => self.load_const(()),
        }
        self.emit(Instr::MakeException(kind));
    }

    /// Creates and raises a new exception of `kind`.
    pub fn raise_new(&mut self, kind: ExcKind, message: &str) {
        self.new_exception(kind, Some(message));
        self.emit(Instr::Raise);
    }

    /// `try: body finally: cleanup`
    ///
    /// Layout:
    /// ```text
    ///     SetupFinally H
    ///     <body>
    ///     PopScope          ; runs the finally body with a fallthrough reason
    /// H:  <cleanup>
    ///     EndFinally
    /// ```
    pub fn try_finally(&mut self, body: impl FnOnce(&mut Self), cleanup: impl FnOnce(&mut Self)) {
        let setup = self.emit_jump(Instr::SetupFinally { target: 0 });
        body(self);
        self.emit(Instr::PopScope);
        self.patch_jump(setup);
        cleanup(self);
        self.emit(Instr::EndFinally);
    }

    /// `try: body except kind as bind: handler`
    ///
    /// The caught exception is stored in `bind`, or dropped when `bind` is `None`.
    ///
    /// Layout:
    /// ```text
    ///     SetupExcept kind H
    ///     <body>
    ///     PopScope
    ///     Jump END
    /// H:  StoreLocal bind | Pop
    ///     <handler>
    ///     PopExcept
    /// END:
    /// ```
    pub fn try_except(
        &mut self,
        kind: ExcKind,
        bind: Option<u16>,
        body: impl FnOnce(&mut Self),
        handler: impl FnOnce(&mut Self),
    ) {
        let setup = self.emit_jump(Instr::SetupExcept { kind, target: 0 });
        body(self);
        self.emit(Instr::PopScope);
        let skip = self.emit_jump(Instr::Jump { target: 0 });
        self.patch_jump(setup);
        self.bind_or_pop(bind);
        handler(self);
        self.emit(Instr::PopExcept);
        self.patch_jump(skip);
    }

    /// `with <manager on TOS> as bind: body`
    ///
    /// Layout:
    /// ```text
    ///      EnterWith END
    ///      StoreLocal bind | Pop
    ///      <body>
    ///      PopScope        ; exit(None)
    /// END:                 ; resume point after a suppressed exception
    /// ```
    pub fn with_block(&mut self, bind: Option<u16>, body: impl FnOnce(&mut Self)) {
        let enter = self.emit_jump(Instr::EnterWith { target: 0 });
        self.bind_or_pop(bind);
        body(self);
        self.emit(Instr::PopScope);
        self.patch_jump(enter);
    }

    /// `for bind in <generator on TOS>: body`
    ///
    /// Layout:
    /// ```text
    ///       GetIter
    /// LOOP: ForIter END
    ///       StoreLocal bind | Pop
    ///       <body>
    ///       Jump LOOP
    /// END:
    /// ```
    pub fn for_each(&mut self, bind: Option<u16>, body: impl FnOnce(&mut Self)) {
        self.emit(Instr::GetIter);
        let loop_start = self.current_offset();
        let exit = self.emit_jump(Instr::ForIter { target: 0 });
        self.bind_or_pop(bind);
        body(self);
        self.emit_jump_to(Instr::Jump { target: 0 }, loop_start);
        self.patch_jump(exit);
    }

    fn bind_or_pop(&mut self, bind: Option<u16>) {
        match bind {
            Some(slot) => self.store_local(slot),
            None => self.emit(Instr::Pop),
        }
    }

    fn offset_u32(&self, offset: usize) -> u32 {
        u32::try_from(offset).expect("code object exceeds u32 instructions")
    }

    /// Finishes the code object.
    #[must_use]
    pub fn build(self) -> Code {
        Code::new(self.instrs, self.consts, self.names.into_names(), self.num_locals)
    }
}

/// Error assembling a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The id was not returned by this builder.
    UnknownFunction(FunctionId),
    /// `define` was called twice for the same function.
    AlreadyDefined(String),
    /// A declared function never received a body.
    Undefined(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFunction(id) => write!(f, "unknown function id {}", id.index()),
            Self::AlreadyDefined(name) => write!(f, "function '{name}' is already defined"),
            Self::Undefined(name) => write!(f, "function '{name}' was declared but never defined"),
        }
    }
}

impl std::error::Error for BuildError {}

#[derive(Debug)]
struct Declared {
    name: Rc<str>,
    kind: FunctionKind,
    arity: u16,
    code: Option<Code>,
}

/// Collects functions into a [`Program`].
///
/// ```ignore
/// let mut program = ProgramBuilder::new();
/// let recurse = program.declare("recurse", FunctionKind::Plain, 1);
/// program.define(recurse, |b| {
///     // ... may emit `Call { func: recurse, .. }` ...
/// })?;
/// let main = program.function("main", FunctionKind::Plain, 0, |b| { /* ... */ });
/// let program = program.build(main)?;
/// ```
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    functions: Vec<Declared>,
}

impl ProgramBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an id for a function whose body is supplied later with [`Self::define`].
    ///
    /// # Panics
    ///
    /// Panics if the program exceeds `u32::MAX` functions.
    pub fn declare(&mut self, name: &str, kind: FunctionKind, arity: u16) -> FunctionId {
        let id = FunctionId::from_index(u32::try_from(self.functions.len()).expect("too many functions"));
        self.functions.push(Declared {
            name: Rc::from(name),
            kind,
            arity,
            code: None,
        });
        id
    }

    /// Supplies the body of a declared function.
    ///
    /// # Errors
    /// Returns an error if `id` was not declared by this builder or already has a body.
    pub fn define(&mut self, id: FunctionId, body: impl FnOnce(&mut CodeBuilder)) -> Result<(), BuildError> {
        let declared = self
            .functions
            .get_mut(id.index())
            .ok_or(BuildError::UnknownFunction(id))?;
        if declared.code.is_some() {
            return Err(BuildError::AlreadyDefined(declared.name.to_string()));
        }
        let mut builder = CodeBuilder::with_params(declared.arity);
        body(&mut builder);
        declared.code = Some(builder.build());
        Ok(())
    }

    /// Declares and defines a function in one step.
    pub fn function(
        &mut self,
        name: &str,
        kind: FunctionKind,
        arity: u16,
        body: impl FnOnce(&mut CodeBuilder),
    ) -> FunctionId {
        let mut builder = CodeBuilder::with_params(arity);
        body(&mut builder);
        let id = self.declare(name, kind, arity);
        if let Some(declared) = self.functions.last_mut() {
            declared.code = Some(builder.build());
        }
        id
    }

    /// Finishes the program with `entry` as the function `Runner::run` starts at.
    ///
    /// # Errors
    /// Returns an error if `entry` is unknown or a declared function was never defined.
    pub fn build(self, entry: FunctionId) -> Result<Program, BuildError> {
        if entry.index() >= self.functions.len() {
            return Err(BuildError::UnknownFunction(entry));
        }
        let functions = self
            .functions
            .into_iter()
            .map(|declared| {
                let Some(mut code) = declared.code else {
                    return Err(BuildError::Undefined(declared.name.to_string()));
                };
                if code.num_locals() < declared.arity {
                    code.set_num_locals(declared.arity);
                }
                Ok(Function::new(declared.name, declared.kind, declared.arity, code))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Program::new(functions, entry))
    }
}

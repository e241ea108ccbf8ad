//! Instruction set.
//!
//! Instructions are a plain Rust enum rather than packed bytes: code objects are small and
//! assembled by hand, and the enum keeps operands typed. `Opcode` is the fieldless
//! discriminant used by tracers and profiling reports.
//!
//! # Stack effects
//!
//! Unless noted otherwise operands are popped from the top of the operand stack, so for
//! binary operations the left operand is pushed first.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumDiscriminants, IntoStaticStr};

use crate::{
    exception_private::ExcKind,
    intern::{FunctionId, NameId},
};

/// A single VM instruction.
///
/// Jump targets are absolute instruction offsets within the same code object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(Opcode), derive(Hash, Display, IntoStaticStr, Serialize, Deserialize))]
pub enum Instr {
    Nop,

    // === Stack and locals ===
    /// Push constant `consts[idx]`.
    LoadConst(u16),
    LoadLocal(u16),
    StoreLocal(u16),
    Pop,
    Dup,

    // === Arithmetic ===
    Add,
    Sub,
    /// Integer less-than, pushes a bool.
    Lt,
    /// Logical not by truthiness.
    Not,

    // === Control flow ===
    Jump { target: u32 },
    JumpIfFalse { target: u32 },

    // === Calls ===
    /// Pops `argc` arguments and calls a bytecode function.
    /// Calling a generator function creates a fresh generator instead of running the body.
    Call { func: FunctionId, argc: u8 },
    /// Pops `argc` arguments and calls the named host function.
    CallHost { name: NameId, argc: u8 },
    /// Runs a class body once and pushes the class name.
    BuildClass { body: FunctionId },
    /// Return TOS (or `None` on an empty stack), running every pending cleanup first.
    Return,
    /// Suspend the generator, handing TOS to whoever advanced it. Resuming pushes nothing.
    Yield,
    /// Pop a value and hand its string form to `Host::print`.
    Print,

    // === Exceptions ===
    /// Pop the message (`None` for no message) and push a new exception of the given kind.
    MakeException(ExcKind),
    /// Pop an exception and raise it. The traceback restarts at this instruction.
    Raise,
    /// Pop a message and raise a `Chained` exception caused by the exception being handled.
    RaiseChained,
    /// Re-raise the innermost handled exception, preserving identity and traceback.
    Reraise,
    /// Push whether the exception on TOS matches `kind`; TOS is left in place.
    ExceptionMatches(ExcKind),
    /// Pop a value and an exception (value on top) and set a side-data field.
    SetField(NameId),
    /// Pop an exception and push the named side-data field.
    GetField(NameId),

    // === Scopes ===
    /// Push a catch boundary. On a matching raise the exception is pushed and control
    /// jumps to `target`; the handler must finish with `PopExcept`.
    SetupExcept { kind: ExcKind, target: u32 },
    /// Push a finally handler at `target`; the finally body must finish with `EndFinally`.
    SetupFinally { target: u32 },
    /// Leave the innermost scope normally. Runs the finally body, calls `exit(None)`,
    /// or closes the generator, depending on the scope.
    PopScope,
    /// Finish an except handler.
    PopExcept,
    /// Finish a finally body, resuming whatever caused it to run.
    EndFinally,
    /// Pop a state value and push a context manager built from two bytecode functions.
    MakeManager { enter: FunctionId, exit: FunctionId },
    /// Pop a manager, call its `enter`, register the exit obligation and push the enter
    /// result. A suppressed exception resumes at `target`, the end of the block.
    EnterWith { target: u32 },
    /// Register the generator on TOS as a live-generator scope of this frame.
    GetIter,
    /// Advance the generator on TOS and push the yielded value; when it is finished pop it,
    /// pop its scope and jump to `target`.
    ForIter { target: u32 },

    // === Names ===
    /// Resolve a (possibly dotted) name through `Host::resolve` and push the value.
    Resolve(NameId),
}

impl Instr {
    /// Mutable access to the jump target, used when patching forward jumps.
    pub(crate) fn target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Self::Jump { target }
            | Self::JumpIfFalse { target }
            | Self::SetupExcept { target, .. }
            | Self::SetupFinally { target }
            | Self::EnterWith { target }
            | Self::ForIter { target } => Some(target),
            _ => None,
        }
    }

    #[must_use]
    pub fn opcode(&self) -> Opcode {
        Opcode::from(self)
    }
}

//! Bytecode for the unwinder VM.
//!
//! This module contains the instruction set, code objects, the builder used to assemble
//! them, and the virtual machine that executes them. There is no source
//! compiler: programs are assembled directly with `CodeBuilder` and `ProgramBuilder`.
//!
//! # Module Structure
//!
//! - `op` - Instruction enum and its `Opcode` discriminants
//! - `code` - Code object containing instructions, constants and names
//! - `builder` - CodeBuilder/ProgramBuilder for assembling programs
//! - `vm` - Virtual machine: frames, scope stacks, unwinding, generators, `with` blocks

pub use builder::{BuildError, CodeBuilder, JumpLabel, ProgramBuilder};
pub use code::{Code, Const};
pub use op::{Instr, Opcode};
pub(crate) use vm::{Frame, VM, make_generator};
pub use vm::ScopeKind;

mod builder;
mod code;
mod op;
mod vm;

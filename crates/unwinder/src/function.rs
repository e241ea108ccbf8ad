use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bytecode::Code;

/// How calling a function behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Runs the body to completion and returns its value.
    Plain,
    /// Calling creates a fresh generator; the body runs on `advance()`.
    Generator,
    /// Body of a class definition, run once by `BuildClass`.
    ClassBody,
}

/// A defined function ready for execution.
///
/// # Local layout
///
/// ```text
/// [params...][locals...]
/// ```
/// Slots `0..arity` receive the call arguments, the remaining `num_locals - arity`
/// slots start out as `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Function {
    /// The function name (used for tracebacks and error messages).
    pub name: Rc<str>,
    pub kind: FunctionKind,
    /// Number of positional parameters.
    pub arity: u16,
    pub code: Code,
}

impl Function {
    pub fn new(name: Rc<str>, kind: FunctionKind, arity: u16, code: Code) -> Self {
        Self { name, kind, arity, code }
    }

    /// Checks the argument count of a call, returning the message for a mismatch.
    pub fn check_arity(&self, given: usize) -> Result<(), String> {
        if given == usize::from(self.arity) {
            Ok(())
        } else {
            let plural = if self.arity == 1 { "" } else { "s" };
            Err(format!(
                "{}() takes {} positional argument{plural} but {given} were given",
                self.name, self.arity
            ))
        }
    }
}

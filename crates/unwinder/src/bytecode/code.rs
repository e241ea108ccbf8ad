use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::{bytecode::Instr, intern::NameId, value::Value};

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
}

impl Const {
    pub(crate) fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl From<i64> for Const {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Const {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<bool> for Const {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Const {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<()> for Const {
    fn from((): ()) -> Self {
        Self::None
    }
}

/// Compiled code for one function body.
///
/// Built by `CodeBuilder`; immutable afterwards. All operand indices are checked when
/// executed, so a malformed code object produces an internal error rather than a panic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Code {
    instrs: Vec<Instr>,
    consts: Vec<Const>,
    names: Vec<Rc<str>>,
    num_locals: u16,
}

impl Code {
    pub(crate) fn new(instrs: Vec<Instr>, consts: Vec<Const>, names: Vec<Rc<str>>, num_locals: u16) -> Self {
        Self {
            instrs,
            consts,
            names,
            num_locals,
        }
    }

    #[must_use]
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    #[must_use]
    pub fn num_locals(&self) -> u16 {
        self.num_locals
    }

    pub(crate) fn set_num_locals(&mut self, num_locals: u16) {
        self.num_locals = num_locals;
    }

    pub(crate) fn instr(&self, ip: usize) -> Option<&Instr> {
        self.instrs.get(ip)
    }

    pub(crate) fn konst(&self, idx: u16) -> Option<&Const> {
        self.consts.get(usize::from(idx))
    }

    pub(crate) fn name(&self, id: NameId) -> Option<&Rc<str>> {
        self.names.get(id.index())
    }
}

use std::rc::Rc;

use super::scope::ScopeStack;
use crate::{
    exception_private::{RunError, RunResult},
    exception_public::StackFrame,
    function::{Function, FunctionKind},
    intern::FunctionId,
    value::Value,
};

/// Activation record of one function body.
///
/// Exists from call entry until the body returns or an exception leaves it. A generator's
/// frame is owned by the generator between resumptions, so its locals, operand stack and
/// scope stack survive suspension.
#[derive(Debug)]
pub(crate) struct Frame {
    pub func_id: FunctionId,
    pub name: Rc<str>,
    pub kind: FunctionKind,
    /// Offset of the next instruction to execute.
    pub ip: usize,
    pub locals: Vec<Value>,
    pub stack: Vec<Value>,
    pub scopes: ScopeStack,
}

impl Frame {
    /// Creates a frame with `args` bound to the parameter slots.
    ///
    /// The caller checks the argument count against the function's arity first.
    pub fn new(func_id: FunctionId, function: &Function, mut args: Vec<Value>) -> Self {
        let num_locals = usize::from(function.code.num_locals()).max(args.len());
        args.resize(num_locals, Value::None);
        Self {
            func_id,
            name: function.name.clone(),
            kind: function.kind,
            ip: 0,
            locals: args,
            stack: Vec::new(),
            scopes: ScopeStack::default(),
        }
    }

    /// Traceback entry for the instruction currently executing.
    pub fn here(&self) -> StackFrame {
        let offset = u32::try_from(self.ip.saturating_sub(1)).unwrap_or(u32::MAX);
        StackFrame::new(self.name.clone(), offset)
    }

    pub fn is_generator(&self) -> bool {
        self.kind == FunctionKind::Generator
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RunError::internal(format!("operand stack underflow in '{}'", self.name)))
    }

    pub fn peek(&self) -> RunResult<&Value> {
        self.stack
            .last()
            .ok_or_else(|| RunError::internal(format!("operand stack underflow in '{}'", self.name)))
    }

    /// Pops `count` values, returning them in push order.
    pub fn pop_n(&mut self, count: usize) -> RunResult<Vec<Value>> {
        let start = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| RunError::internal(format!("operand stack underflow in '{}'", self.name)))?;
        Ok(self.stack.split_off(start))
    }

    pub fn local(&self, slot: u16) -> RunResult<Value> {
        self.locals
            .get(usize::from(slot))
            .cloned()
            .ok_or_else(|| RunError::internal(format!("local slot {slot} out of range in '{}'", self.name)))
    }

    pub fn set_local(&mut self, slot: u16, value: Value) -> RunResult<()> {
        let name = &self.name;
        let local = self
            .locals
            .get_mut(usize::from(slot))
            .ok_or_else(|| RunError::internal(format!("local slot {slot} out of range in '{name}'")))?;
        *local = value;
        Ok(())
    }

    pub fn jump(&mut self, target: u32) {
        self.ip = target as usize;
    }
}

//! Context manager protocol for `with` blocks.

use super::{Flow, Frame, Then, VM, scope::Why};
use crate::{
    exception_private::{ExcKind, RunResult},
    host::Host,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::ManagerRef,
    value::Value,
};

impl<T: ResourceTracker, H: Host, Tr: VmTracer> VM<'_, T, H, Tr> {
    /// `EnterWith`: pops a manager and calls its `enter`. The pending `exit` is registered
    /// once `enter` returns.
    ///
    /// If `enter` raises, no scope entry is pushed and `exit` is never called.
    pub(super) fn enter_with(&mut self, frame: &mut Frame, target: u32) -> RunResult<Flow> {
        let manager = match frame.pop()? {
            Value::Manager(manager) => manager,
            other => {
                return Err(ExcKind::type_error(format!(
                    "'{}' object does not support the context manager protocol",
                    other.type_name()
                )));
            }
        };
        let stack_depth = frame.stack.len();
        let enter = manager.enter().clone();
        let args = vec![manager.state().clone()];
        let then = Then::Entered {
            manager,
            target: target as usize,
            stack_depth,
        };
        Ok(self.call(frame, &enter, args, then))
    }

    /// Calls `exit(state, None)` for a block left normally.
    pub(super) fn exit_normally(&mut self, frame: &mut Frame, manager: &ManagerRef) -> Flow {
        let exit = manager.exit().clone();
        let args = vec![manager.state().clone(), Value::None];
        self.call(frame, &exit, args, Then::Discard)
    }

    /// Calls `exit(state, exc)` for a block left by `why`; unwinding resumes when it returns.
    ///
    /// `exc` counts as the exception being handled while `exit` runs, so anything `exit`
    /// raises is chained to it.
    pub(super) fn exit_unwinding(&mut self, frame: &mut Frame, manager: &ManagerRef, why: Why, target: usize) -> Flow {
        let exc_value = match why.exception() {
            Some(exc) => {
                self.ctx.push_handled(exc.clone());
                Value::Exception(exc.clone())
            }
            None => Value::None,
        };
        let exit = manager.exit().clone();
        let args = vec![manager.state().clone(), exc_value];
        self.call(frame, &exit, args, Then::ExitUnwinding { why, target })
    }

    /// Continues after an `exit` called while unwinding returned `suppress`.
    pub(super) fn exit_returned(&mut self, frame: &mut Frame, why: Why, target: usize, suppress: bool) -> Flow {
        if suppress && let Why::Raising(exc) = &why {
            self.ctx.clear_in_flight();
            self.tracer.on_suppress(exc.kind());
            frame.ip = target;
            return Flow::Next;
        }
        Flow::Unwind(why)
    }
}

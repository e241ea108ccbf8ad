//! Raising, catching and scope unwinding.

use super::{
    Flow, Frame, FrameExit, VM,
    scope::{ScopeEntry, ScopeKind, Why},
};
use crate::{
    exception_private::{ExcKind, ExceptionRef, RunError, RunResult},
    host::Host,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, H: Host, Tr: VmTracer> VM<'_, T, H, Tr> {
    /// Positions a freshly raised exception at the current instruction.
    ///
    /// The traceback restarts at this frame. A cause linked implicitly by an earlier raise
    /// is dropped, and the exception is linked to `superseded` (or else to the exception
    /// being handled) unless it carries an explicit cause.
    fn stamp_raise(&mut self, frame: &Frame, exc: &ExceptionRef, superseded: Option<&ExceptionRef>) {
        exc.reset_traceback(frame.here());
        exc.clear_implicit_cause();
        let context = superseded.or_else(|| self.ctx.current_handled()).cloned();
        if let Some(context) = context {
            exc.chain_to(&context);
        }
        self.tracer.on_raise(exc.kind(), self.depth);
    }

    /// Routes an error produced by an instruction into the frame's scope stack.
    pub(super) fn handle_error(&mut self, frame: &mut Frame, err: RunError) -> Flow {
        match err {
            RunError::Raise(exc) => {
                self.stamp_raise(frame, &exc, None);
                Flow::Unwind(Why::Raising(exc))
            }
            RunError::Propagate(exc) => Flow::Unwind(Why::Raising(exc)),
            err => self.abandon(frame, err),
        }
    }

    /// Pops scope entries until one resumes execution in this frame.
    ///
    /// Returns `Next` when a handler or finally body takes over (the frame's `ip` now
    /// points at it), `Call` when an `exit` or a generator close has to run first, and
    /// `Exit` when a return got through every cleanup or an exception leaves the frame.
    pub(super) fn unwind(&mut self, frame: &mut Frame, why: Why) -> Flow {
        loop {
            if let Why::Raising(exc) = &why {
                self.ctx.set_in_flight(exc.clone());
            }
            let Some(entry) = frame.scopes.pop() else {
                return Flow::Exit(match why {
                    Why::Returning(value) => Ok(FrameExit::Return(value)),
                    Why::Raising(exc) => Err(RunError::Propagate(exc)),
                    Why::Fallthrough => Err(RunError::internal("fallthrough unwound past the frame")),
                });
            };
            self.tracer.on_scope_pop(entry.kind(), true);
            frame.stack.truncate(entry.stack_depth());

            match entry {
                ScopeEntry::Except { kind, target, .. } => {
                    if let Why::Raising(exc) = &why
                        && exc.matches(kind)
                    {
                        let exc = exc.clone();
                        self.ctx.clear_in_flight();
                        self.tracer.on_catch(exc.kind(), self.depth);
                        self.ctx.push_handled(exc.clone());
                        let stack_depth = frame.stack.len();
                        self.push_scope(
                            frame,
                            ScopeEntry::Handling {
                                exc: exc.clone(),
                                stack_depth,
                            },
                        );
                        frame.push(Value::Exception(exc));
                        frame.ip = target;
                        return Flow::Next;
                    }
                }
                ScopeEntry::Finally { target, stack_depth } => {
                    if let Some(exc) = why.exception() {
                        self.ctx.push_handled(exc.clone());
                    }
                    self.push_scope(frame, ScopeEntry::Cleanup { why, stack_depth });
                    frame.ip = target;
                    return Flow::Next;
                }
                ScopeEntry::ContextManager { manager, target, .. } => {
                    return self.exit_unwinding(frame, &manager, why, target);
                }
                ScopeEntry::LiveGenerator { generator, .. } => {
                    return self.start_close(frame, generator, Some(why));
                }
                ScopeEntry::Handling { .. } => {
                    self.ctx.pop_handled();
                }
                ScopeEntry::Cleanup { why: pending, .. } => {
                    // Leaving a finally body early discards whatever it was going to resume.
                    if let Some(pending) = pending.exception() {
                        self.ctx.pop_handled();
                        if self.ctx.in_flight().is_some_and(|exc| exc.ptr_eq(pending)) {
                            self.ctx.clear_in_flight();
                        }
                    }
                }
            }
        }
    }

    /// Replaces the reason for unwinding with an error raised by a cleanup, then keeps
    /// unwinding.
    ///
    /// The new exception is chained to the one it supersedes. Uncatchable and internal
    /// errors abandon the rest of the frame instead.
    pub(super) fn supersede(&mut self, frame: &mut Frame, why: Why, err: RunError) -> Flow {
        match err {
            RunError::Raise(exc) => {
                self.stamp_raise(frame, &exc, why.exception());
                Flow::Unwind(Why::Raising(exc))
            }
            RunError::Propagate(exc) => {
                if let Some(previous) = why.exception() {
                    exc.chain_to(previous);
                }
                Flow::Unwind(Why::Raising(exc))
            }
            err => self.abandon(frame, err),
        }
    }

    /// Leaves the frame for an uncatchable or internal error.
    ///
    /// Every scope entry is dropped without running cleanups, keeping the handled stack
    /// balanced.
    fn abandon(&mut self, frame: &mut Frame, err: RunError) -> Flow {
        if let RunError::Uncatchable(exc) = &err {
            exc.push_traceback(frame.here());
            self.ctx.set_in_flight(exc.clone());
        }
        while let Some(entry) = frame.scopes.pop() {
            if entry.handled_exception().is_some() {
                self.ctx.pop_handled();
            }
        }
        Flow::Exit(Err(err))
    }

    /// Bare `raise`: re-raises the exception currently being handled, unchanged.
    pub(super) fn reraise(&self) -> RunError {
        match self.ctx.current_handled() {
            Some(exc) => RunError::Propagate(exc.clone()),
            None => ExcKind::no_active_exception(),
        }
    }

    /// Leaves the innermost guarded region normally.
    pub(super) fn pop_scope(&mut self, frame: &mut Frame) -> RunResult<Flow> {
        let entry = frame
            .scopes
            .pop()
            .ok_or_else(|| RunError::internal("PopScope with an empty scope stack"))?;
        let kind = entry.kind();
        if matches!(kind, ScopeKind::Handling | ScopeKind::Cleanup) {
            frame.scopes.push(entry);
            return Err(RunError::internal(format!("PopScope would remove an active {kind} entry")));
        }
        self.tracer.on_scope_pop(kind, false);

        Ok(match entry {
            ScopeEntry::Finally { target, stack_depth } => {
                frame.stack.truncate(stack_depth);
                self.push_scope(
                    frame,
                    ScopeEntry::Cleanup {
                        why: Why::Fallthrough,
                        stack_depth,
                    },
                );
                frame.ip = target;
                Flow::Next
            }
            ScopeEntry::ContextManager {
                manager, stack_depth, ..
            } => {
                frame.stack.truncate(stack_depth);
                self.exit_normally(frame, &manager)
            }
            ScopeEntry::LiveGenerator { generator, stack_depth } => {
                frame.stack.truncate(stack_depth);
                self.start_close(frame, generator, None)
            }
            ScopeEntry::Except { .. } | ScopeEntry::Handling { .. } | ScopeEntry::Cleanup { .. } => Flow::Next,
        })
    }

    /// Ends an except handler body.
    pub(super) fn pop_except(&mut self, frame: &mut Frame) -> RunResult<()> {
        match frame.scopes.pop() {
            Some(ScopeEntry::Handling { stack_depth, .. }) => {
                self.tracer.on_scope_pop(ScopeKind::Handling, false);
                self.ctx.pop_handled();
                frame.stack.truncate(stack_depth);
                Ok(())
            }
            Some(entry) => {
                let kind = entry.kind();
                frame.scopes.push(entry);
                Err(RunError::internal(format!("PopExcept found {kind} on the scope stack")))
            }
            None => Err(RunError::internal("PopExcept with an empty scope stack")),
        }
    }

    /// Ends a finally body and resumes whatever entered it.
    pub(super) fn end_finally(&mut self, frame: &mut Frame) -> RunResult<Flow> {
        match frame.scopes.pop() {
            Some(ScopeEntry::Cleanup { why, stack_depth }) => {
                self.tracer.on_scope_pop(ScopeKind::Cleanup, false);
                frame.stack.truncate(stack_depth);
                Ok(match why {
                    Why::Fallthrough => Flow::Next,
                    Why::Returning(value) => Flow::Unwind(Why::Returning(value)),
                    Why::Raising(exc) => {
                        self.ctx.pop_handled();
                        Flow::Unwind(Why::Raising(exc))
                    }
                })
            }
            Some(entry) => {
                let kind = entry.kind();
                frame.scopes.push(entry);
                Err(RunError::internal(format!("EndFinally found {kind} on the scope stack")))
            }
            None => Err(RunError::internal("EndFinally with an empty scope stack")),
        }
    }
}

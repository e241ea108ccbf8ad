//! Generator resumption, closing, iteration and orphan finalization.

use std::rc::Rc;

use super::{
    Activation, Flow, Frame, FrameExit, Outcome, Then, VM,
    scope::{ScopeEntry, ScopeKind, Why},
};
use crate::{
    context::{ExecContext, Orphan, OrphanQueue},
    exception_private::{ExcKind, ExceptionRef, RunError, RunResult},
    function::{Function, FunctionKind},
    host::Host,
    intern::FunctionId,
    resource::ResourceTracker,
    run::Program,
    tracer::VmTracer,
    types::{Generator, GeneratorRef, GeneratorState, GeneratorStep},
    value::Value,
};

/// Creates a fresh generator for a generator function without running any of its body.
pub(crate) fn make_generator(
    program: &Program,
    orphans: OrphanQueue,
    func_id: FunctionId,
    args: Vec<Value>,
) -> RunResult<GeneratorRef> {
    let function = program
        .function(func_id)
        .ok_or_else(|| RunError::internal(format!("unknown function id {}", func_id.index())))?;
    if function.kind != FunctionKind::Generator {
        return Err(ExcKind::type_error(format!(
            "'{}' is not a generator function",
            function.name
        )));
    }
    function.check_arity(args.len()).map_err(ExcKind::type_error)?;
    let frame = Frame::new(func_id, function, args);
    Ok(GeneratorRef::new(func_id, function.name.clone(), frame, orphans))
}

/// Creates the generator returned by calling a generator function whose arity was checked.
pub(super) fn new_generator(
    ctx: &ExecContext,
    func_id: FunctionId,
    function: &Function,
    args: Vec<Value>,
) -> GeneratorRef {
    let frame = Frame::new(func_id, function, args);
    GeneratorRef::new(func_id, function.name.clone(), frame, ctx.orphan_queue())
}

impl<T: ResourceTracker, H: Host, Tr: VmTracer> VM<'_, T, H, Tr> {
    pub(super) fn set_state(&mut self, generator: &mut Generator, to: GeneratorState) {
        let from = generator.state;
        if from != to {
            generator.state = to;
            self.tracer.on_generator(&generator.name, from, to);
        }
    }

    /// Builds the activation that resumes a generator until it yields, returns or raises.
    ///
    /// With `throw`, the exception is raised at the suspension point instead of resuming
    /// normally; thrown into a fresh generator it completes the generator without running it.
    fn resume_activation(
        &mut self,
        generator: &GeneratorRef,
        throw: Option<ExceptionRef>,
        then: Then,
    ) -> RunResult<Activation> {
        let mut state = generator.borrow_mut();
        match (state.state, throw) {
            (GeneratorState::Running, _) => Err(ExcKind::generator_already_executing()),
            (GeneratorState::Completed | GeneratorState::Closed, None) => Err(ExcKind::generator_exhausted(&state.name)),
            (GeneratorState::Completed | GeneratorState::Closed, Some(exc)) => Err(RunError::Raise(exc)),
            (GeneratorState::Fresh, Some(exc)) => {
                let unstarted = state.frame.take();
                self.set_state(&mut state, GeneratorState::Completed);
                drop(state);
                drop(unstarted);
                Err(RunError::Raise(exc))
            }
            (GeneratorState::Fresh | GeneratorState::Suspended, throw) => {
                self.tracker.check_recursion_depth(self.depth)?;
                let frame = state
                    .frame
                    .take()
                    .ok_or_else(|| RunError::internal(format!("generator '{}' lost its frame", state.name)))?;
                self.set_state(&mut state, GeneratorState::Running);
                Ok(Activation {
                    frame,
                    generator: Some(generator.clone()),
                    throw,
                    then,
                })
            }
        }
    }

    /// Removes a suspended frame's active handlers from the context's handled stack.
    pub(super) fn stash_handled(&mut self, frame: &Frame) {
        for _ in frame.scopes.handled_exceptions() {
            self.ctx.pop_handled();
        }
    }

    /// Advances a generator (or throws into it) on behalf of the harness.
    pub(crate) fn resume_generator(
        &mut self,
        generator: &GeneratorRef,
        throw: Option<ExceptionRef>,
    ) -> RunResult<GeneratorStep> {
        let activation = self.resume_activation(generator, throw, Then::Harness)?;
        match self.run(activation).1? {
            FrameExit::Yield(value) => Ok(GeneratorStep::Yielded(value)),
            FrameExit::Return(value) => Ok(GeneratorStep::Completed(value)),
        }
    }

    /// Takes a generator's frame out for closing.
    ///
    /// `None` means there is nothing to run: finished generators stay as they are and a
    /// fresh one is closed on the spot.
    fn begin_close(&mut self, generator: &GeneratorRef) -> RunResult<Option<Frame>> {
        let mut state = generator.borrow_mut();
        match state.state {
            GeneratorState::Completed | GeneratorState::Closed => Ok(None),
            GeneratorState::Running => Err(ExcKind::generator_already_executing()),
            GeneratorState::Fresh => {
                let unstarted = state.frame.take();
                self.set_state(&mut state, GeneratorState::Closed);
                drop(state);
                drop(unstarted);
                Ok(None)
            }
            GeneratorState::Suspended => {
                self.tracker.check_recursion_depth(self.depth)?;
                let frame = state
                    .frame
                    .take()
                    .ok_or_else(|| RunError::internal(format!("generator '{}' lost its frame", state.name)))?;
                self.set_state(&mut state, GeneratorState::Running);
                Ok(Some(frame))
            }
        }
    }

    /// Raises `GeneratorExit` at the suspension point of a frame taken by `begin_close`.
    fn close_activation(frame: Frame, generator: GeneratorRef, then: Then) -> Activation {
        Activation {
            frame,
            generator: Some(generator),
            throw: Some(ExceptionRef::new_none(ExcKind::GeneratorExit)),
            then,
        }
    }

    /// Closes a generator whose loop `caller` is leaving, then resumes with `why`.
    pub(super) fn start_close(&mut self, caller: &mut Frame, generator: GeneratorRef, why: Option<Why>) -> Flow {
        match self.begin_close(&generator) {
            Ok(Some(frame)) => {
                let saved = self.ctx.take_in_flight();
                let then = Then::Close {
                    generator: generator.clone(),
                    why,
                    saved,
                };
                Flow::Call(Box::new(Self::close_activation(frame, generator, then)))
            }
            Ok(None) => self.after_close(caller, why, Ok(())),
            Err(err) => self.after_close(caller, why, Err(err)),
        }
    }

    /// Settles a generator after the `GeneratorExit` thrown into it ran its course.
    ///
    /// If the body yields again the close fails with a `RuntimeError` and the generator
    /// stays suspended.
    pub(super) fn close_result(&mut self, generator: &GeneratorRef, outcome: Outcome) -> RunResult<()> {
        let result = match outcome {
            Ok(FrameExit::Yield(_)) => return Err(ExcKind::generator_ignored_exit()),
            Ok(FrameExit::Return(_)) => Ok(()),
            Err(RunError::Raise(exc) | RunError::Propagate(exc)) if exc.matches(ExcKind::GeneratorExit) => Ok(()),
            Err(err) => Err(err),
        };
        self.set_state(&mut generator.borrow_mut(), GeneratorState::Closed);
        result
    }

    /// Continues `caller` once a generator it was leaving is closed.
    pub(super) fn after_close(&mut self, caller: &mut Frame, why: Option<Why>, result: RunResult<()>) -> Flow {
        match (why, result) {
            (Some(why), Ok(())) => Flow::Unwind(why),
            (Some(why), Err(err)) => self.supersede(caller, why, err),
            (None, Ok(())) => Flow::Next,
            (None, Err(err)) => Flow::Fail(err),
        }
    }

    /// Closes a generator on behalf of the harness, running the cleanups still pending in
    /// its frame. Closing a finished generator does nothing.
    pub(crate) fn close_generator(&mut self, generator: &GeneratorRef) -> RunResult<()> {
        let Some(frame) = self.begin_close(generator)? else {
            return Ok(());
        };
        let saved = self.ctx.take_in_flight();
        let activation = Self::close_activation(frame, generator.clone(), Then::Harness);
        let outcome = self.run(activation).1;
        let result = self.close_result(generator, outcome);
        self.ctx.restore_in_flight(saved);
        result
    }

    /// Finalizes every generator dropped while suspended, including ones dropped by the
    /// finalization itself.
    pub(crate) fn reap_orphans(&mut self) {
        while let Some(activation) = self.next_orphan() {
            if let (Then::Orphan { name, saved }, outcome) = self.run(activation) {
                self.orphan_done(&name, saved, outcome);
            }
        }
    }

    /// The finalization of the oldest pending orphan, if any can run.
    pub(super) fn next_orphan(&mut self) -> Option<Activation> {
        while self.ctx.has_orphans() {
            if let Some(activation) = self.ctx.pop_orphan().and_then(|orphan| self.orphan_activation(orphan)) {
                return Some(activation);
            }
        }
        None
    }

    /// Throws `GeneratorExit` into an orphaned frame.
    fn orphan_activation(&mut self, orphan: Orphan) -> Option<Activation> {
        let Orphan { name, frame } = orphan;
        if let Err(err) = self.tracker.check_recursion_depth(self.depth) {
            self.report_unraisable(&err.into_exception());
            return None;
        }
        self.tracer
            .on_generator(&name, GeneratorState::Suspended, GeneratorState::Running);
        let saved = self.ctx.take_in_flight();
        Some(Activation {
            frame,
            generator: None,
            throw: Some(ExceptionRef::new_none(ExcKind::GeneratorExit)),
            then: Then::Orphan { name, saved },
        })
    }

    /// Wraps up an orphan's finalization. Nothing is left to propagate to, so failures
    /// are reported through the host as unraisable.
    pub(super) fn orphan_done(&mut self, name: &Rc<str>, saved: Option<ExceptionRef>, outcome: Outcome) {
        match outcome {
            Ok(FrameExit::Yield(_)) => self.report_unraisable(&ExcKind::generator_ignored_exit().into_exception()),
            Ok(FrameExit::Return(_)) => {}
            Err(err) => {
                let exc = err.into_exception();
                if !exc.matches(ExcKind::GeneratorExit) {
                    self.report_unraisable(&exc);
                }
            }
        }
        self.tracer
            .on_generator(name, GeneratorState::Running, GeneratorState::Closed);
        self.ctx.restore_in_flight(saved);
    }

    fn report_unraisable(&mut self, exc: &ExceptionRef) {
        self.tracer.on_unraisable(exc.kind());
        self.host.report_unraisable(exc);
    }

    /// `GetIter`: starts a loop over the generator on top of the stack.
    pub(super) fn get_iter(&mut self, frame: &mut Frame) -> RunResult<()> {
        let generator = match frame.pop()? {
            Value::Generator(generator) => generator,
            other => {
                return Err(ExcKind::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )));
            }
        };
        let stack_depth = frame.stack.len();
        self.push_scope(frame, ScopeEntry::LiveGenerator { generator, stack_depth });
        Ok(())
    }

    /// `ForIter`: pushes the next value, or ends the loop and jumps to `target`.
    pub(super) fn for_iter(&mut self, frame: &mut Frame, target: u32) -> RunResult<Flow> {
        let generator = match frame.scopes.top() {
            Some(ScopeEntry::LiveGenerator { generator, .. }) => generator.clone(),
            _ => return Err(RunError::internal("ForIter outside a generator loop")),
        };
        if generator.state().is_finished() {
            self.end_iteration(frame, target)?;
            return Ok(Flow::Next);
        }
        let activation = self.resume_activation(&generator, None, Then::Iterate { target })?;
        Ok(Flow::Call(Box::new(activation)))
    }

    pub(super) fn end_iteration(&mut self, frame: &mut Frame, target: u32) -> RunResult<()> {
        match frame.scopes.pop() {
            Some(ScopeEntry::LiveGenerator { stack_depth, .. }) => {
                self.tracer.on_scope_pop(ScopeKind::LiveGenerator, false);
                frame.stack.truncate(stack_depth);
                frame.jump(target);
                Ok(())
            }
            _ => Err(RunError::internal("generator loop scope missing at loop exit")),
        }
    }
}

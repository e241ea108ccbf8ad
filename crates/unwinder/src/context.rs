//! Per-execution-path exception state.

use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::{Rc, Weak},
};

use crate::{bytecode::Frame, exception_private::ExceptionRef};

/// A suspended generator frame whose last handle was dropped.
#[derive(Debug)]
pub(crate) struct Orphan {
    pub name: Rc<str>,
    pub frame: Frame,
}

type OrphanList = RefCell<VecDeque<Orphan>>;

/// A generator's link to the orphan queue of the context it was created on.
///
/// Weak, so a generator outliving its context (or stored inside its own frame) does not
/// keep the queue alive.
pub(crate) type OrphanQueue = Weak<OrphanList>;

/// Exception state of one logical execution path.
///
/// Every run, call and generator operation takes the context by `&mut`; independent
/// contexts share nothing. The context owns:
///
/// - the in-flight slot: the exception currently propagating, if any. Empty after an
///   exception is caught, and holding exactly the escaped exception after a run fails.
/// - the handled stack: exceptions whose except or finally bodies are running, innermost
///   last. Bare re-raise takes the top entry, and fresh raises are implicitly chained to it.
/// - the orphan queue: suspended generators dropped without being closed, awaiting
///   finalization. Dropping the context discards pending orphans without running their
///   cleanups, and generators dropped after that are not finalized at all.
#[derive(Debug, Default)]
pub struct ExecContext {
    in_flight: Option<ExceptionRef>,
    handled: Vec<ExceptionRef>,
    orphans: Rc<OrphanList>,
}

impl ExecContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The exception currently propagating, or the one that escaped the last operation.
    #[must_use]
    pub fn in_flight(&self) -> Option<&ExceptionRef> {
        self.in_flight.as_ref()
    }

    /// Number of exceptions whose handlers are currently running.
    ///
    /// Zero whenever no code is executing on this context.
    #[must_use]
    pub fn handled_depth(&self) -> usize {
        self.handled.len()
    }

    /// Number of dropped generators still waiting for finalization.
    #[must_use]
    pub fn pending_orphans(&self) -> usize {
        self.orphans.borrow().len()
    }

    pub(crate) fn set_in_flight(&mut self, exc: ExceptionRef) {
        self.in_flight = Some(exc);
    }

    pub(crate) fn take_in_flight(&mut self) -> Option<ExceptionRef> {
        self.in_flight.take()
    }

    pub(crate) fn restore_in_flight(&mut self, exc: Option<ExceptionRef>) {
        self.in_flight = exc;
    }

    pub(crate) fn clear_in_flight(&mut self) {
        self.in_flight = None;
    }

    pub(crate) fn push_handled(&mut self, exc: ExceptionRef) {
        self.handled.push(exc);
    }

    pub(crate) fn pop_handled(&mut self) -> Option<ExceptionRef> {
        self.handled.pop()
    }

    pub(crate) fn current_handled(&self) -> Option<&ExceptionRef> {
        self.handled.last()
    }

    pub(crate) fn orphan_queue(&self) -> OrphanQueue {
        Rc::downgrade(&self.orphans)
    }

    pub(crate) fn has_orphans(&self) -> bool {
        self.orphans.try_borrow().is_ok_and(|orphans| !orphans.is_empty())
    }

    pub(crate) fn pop_orphan(&self) -> Option<Orphan> {
        self.orphans.try_borrow_mut().ok()?.pop_front()
    }
}

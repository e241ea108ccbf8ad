//! Generator objects.
//!
//! Calling a generator function creates a `Generator` holding a fresh frame. Each
//! `advance()` resumes that frame until the next `Yield` or until the body returns or
//! raises. The frame, including its scope stack, is retained across suspensions, so
//! cleanups registered before a `Yield` are still pending when the generator is closed.

use std::{
    cell::{RefCell, RefMut},
    fmt,
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::{
    bytecode::Frame,
    context::{Orphan, OrphanQueue},
    intern::FunctionId,
    value::Value,
};

/// Generator execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
pub enum GeneratorState {
    /// Created but not yet started; nothing has run.
    Fresh,
    /// Stopped at a `Yield`; the frame is saved and can be resumed.
    Suspended,
    /// Currently executing. Prevents reentrant advance/close/throw.
    Running,
    /// Returned or raised. Further `advance()` calls fail with `GeneratorExhausted`.
    Completed,
    /// Torn down by `close()`.
    Closed,
}

impl GeneratorState {
    /// True once the body can never run again.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Closed)
    }
}

/// Outcome of advancing or throwing into a generator.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorStep {
    /// The body yielded a value and is suspended.
    Yielded(Value),
    /// The body returned; the generator is completed.
    Completed(Value),
}

#[derive(Debug)]
pub(crate) struct Generator {
    pub func_id: FunctionId,
    pub name: Rc<str>,
    pub state: GeneratorState,
    /// Present while fresh or suspended; taken by the VM while running.
    pub frame: Option<Frame>,
    /// Where the frame goes if the last handle is dropped while suspended.
    orphans: OrphanQueue,
}

impl Drop for Generator {
    fn drop(&mut self) {
        if self.state != GeneratorState::Suspended {
            return;
        }
        if let Some(frame) = self.frame.take()
            && let Some(queue) = self.orphans.upgrade()
            && let Ok(mut orphans) = queue.try_borrow_mut()
        {
            orphans.push_back(Orphan {
                name: self.name.clone(),
                frame,
            });
        }
    }
}

/// Shared handle to a generator.
#[derive(Clone)]
pub struct GeneratorRef(Rc<RefCell<Generator>>);

impl GeneratorRef {
    pub(crate) fn new(func_id: FunctionId, name: Rc<str>, frame: Frame, orphans: OrphanQueue) -> Self {
        Self(Rc::new(RefCell::new(Generator {
            func_id,
            name,
            state: GeneratorState::Fresh,
            frame: Some(frame),
            orphans,
        })))
    }

    #[must_use]
    pub fn state(&self) -> GeneratorState {
        self.0.borrow().state
    }

    #[must_use]
    pub fn name(&self) -> Rc<str> {
        self.0.borrow().name.clone()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, Generator> {
        self.0.borrow_mut()
    }
}

impl fmt::Debug for GeneratorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(generator) => f
                .debug_struct("GeneratorRef")
                .field("name", &generator.name)
                .field("state", &generator.state)
                .finish(),
            Err(_) => f.write_str("GeneratorRef(<borrowed>)"),
        }
    }
}

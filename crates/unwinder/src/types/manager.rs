//! Context manager objects for `with` blocks.

use std::{fmt, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{intern::FunctionId, value::Value};

/// Something a manager can call for `enter` or `exit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callable {
    /// A bytecode function of the running program.
    Function(FunctionId),
    /// A host function, called through `Host::call`.
    Host(Rc<str>),
}

#[derive(Debug)]
struct Manager {
    name: Rc<str>,
    enter: Callable,
    exit: Callable,
    /// Passed as the first argument to both `enter` and `exit`.
    state: Value,
}

/// Shared handle to a context manager.
///
/// `enter(state)` runs when the block is entered and its result is bound by the block.
/// `exit(state, exc)` runs exactly once when the block is left, with `exc` set to the
/// exception in flight or `None`. A truthy `exit` result suppresses the exception.
#[derive(Clone)]
pub struct ManagerRef(Rc<Manager>);

impl ManagerRef {
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>, enter: Callable, exit: Callable, state: Value) -> Self {
        Self(Rc::new(Manager {
            name: name.into(),
            enter,
            exit,
            state,
        }))
    }

    /// A manager implemented by the host as `{name}.__enter__` and `{name}.__exit__`.
    #[must_use]
    pub fn host(name: &str, state: Value) -> Self {
        Self::new(
            name,
            Callable::Host(Rc::from(format!("{name}.__enter__"))),
            Callable::Host(Rc::from(format!("{name}.__exit__"))),
            state,
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn state(&self) -> &Value {
        &self.0.state
    }

    pub(crate) fn enter(&self) -> &Callable {
        &self.0.enter
    }

    pub(crate) fn exit(&self) -> &Callable {
        &self.0.exit
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ManagerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerRef")
            .field("name", &self.0.name)
            .field("enter", &self.0.enter)
            .field("exit", &self.0.exit)
            .finish_non_exhaustive()
    }
}

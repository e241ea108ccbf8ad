use std::{
    borrow::Cow,
    cell::{Cell, Ref, RefCell},
    fmt,
    rc::Rc,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    exception_public::{Exception, StackFrame},
    value::Value,
};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Exception kinds understood by the VM.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `UserRaised` -> "UserRaised").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ExcKind {
    /// Root of the hierarchy - an `except BaseException` boundary catches everything.
    BaseException,
    /// Catches everything except `BaseException` and `GeneratorExit`.
    Exception,
    /// Teardown signal injected into a suspended generator by `close()`.
    /// Inherits from BaseException, not Exception.
    GeneratorExit,

    /// Explicit raise with a user payload.
    UserRaised,
    /// Name or import resolution failure.
    UnresolvedReference,
    /// `advance()` called on a completed or closed generator.
    GeneratorExhausted,
    /// Explicit wrapper linking a new exception to the one being handled.
    Chained,

    // --- RuntimeError hierarchy ---
    /// Protocol violations (reentrant generators, ignored close, bare raise with nothing to raise).
    RuntimeError,
    /// Subclass of RuntimeError raised when the call depth limit is hit.
    RecursionError,

    /// Operand of the wrong type for an instruction.
    TypeError,
    /// Raised when the operation or time budget is exhausted. Never catchable.
    TimeoutError,
}

impl ExcKind {
    /// Checks if this exception kind is a subclass of another exception kind.
    ///
    /// Returns true if `self` would be caught by an `except handler:` boundary.
    #[must_use]
    pub fn is_subclass_of(self, handler: Self) -> bool {
        if self == handler {
            return true;
        }
        match handler {
            Self::BaseException => true,
            Self::Exception => !matches!(self, Self::BaseException | Self::GeneratorExit),
            Self::RuntimeError => matches!(self, Self::RecursionError),
            _ => false,
        }
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> RunError {
        ExceptionRef::new(Self::TypeError, msg).into()
    }

    pub(crate) fn runtime_error(msg: impl Into<String>) -> RunError {
        ExceptionRef::new(Self::RuntimeError, msg).into()
    }

    pub(crate) fn generator_exhausted(name: &str) -> RunError {
        ExceptionRef::new(Self::GeneratorExhausted, format!("generator '{name}' is exhausted")).into()
    }

    pub(crate) fn generator_already_executing() -> RunError {
        Self::runtime_error("generator already executing")
    }

    pub(crate) fn generator_ignored_exit() -> RunError {
        Self::runtime_error("generator ignored GeneratorExit")
    }

    pub(crate) fn no_active_exception() -> RunError {
        Self::runtime_error("No active exception to reraise")
    }

    pub(crate) fn no_module(module: &str) -> RunError {
        ExceptionRef::new(Self::UnresolvedReference, format!("No module named {module}")).into()
    }

    pub(crate) fn cannot_import(name: &str) -> RunError {
        ExceptionRef::new(Self::UnresolvedReference, format!("cannot import name {name}")).into()
    }
}

/// The live exception object shared by every handle that refers to it.
struct ExceptionObject {
    kind: ExcKind,
    message: Option<String>,
    cause: RefCell<Option<ExceptionRef>>,
    /// Set while `cause` was linked by the VM rather than by raising code.
    implicit: Cell<bool>,
    /// Side-data attached by raising code, kept in insertion order.
    fields: RefCell<IndexMap<String, Value>>,
    /// Innermost frame first; callers are appended as the exception leaves each frame.
    traceback: RefCell<Vec<StackFrame>>,
}

/// Handle to a live exception object.
///
/// Cloning the handle does not copy the exception: every clone observes the same
/// side-data, cause and traceback, and [`ExceptionRef::ptr_eq`] reports identity.
/// Re-raising an exception re-raises the same object.
#[derive(Clone)]
pub struct ExceptionRef(Rc<ExceptionObject>);

impl ExceptionRef {
    /// Creates an exception carrying a message.
    #[must_use]
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self::build(kind, Some(message.into()))
    }

    /// Creates an exception without a message (`raise GeneratorExit`).
    #[must_use]
    pub fn new_none(kind: ExcKind) -> Self {
        Self::build(kind, None)
    }

    fn build(kind: ExcKind, message: Option<String>) -> Self {
        Self(Rc::new(ExceptionObject {
            kind,
            message,
            cause: RefCell::new(None),
            implicit: Cell::new(false),
            fields: RefCell::new(IndexMap::new()),
            traceback: RefCell::new(Vec::new()),
        }))
    }

    #[must_use]
    pub fn kind(&self) -> ExcKind {
        self.0.kind
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.0.message.as_deref()
    }

    /// Returns true when an `except kind` boundary would catch this exception.
    #[must_use]
    pub fn matches(&self, kind: ExcKind) -> bool {
        self.0.kind.is_subclass_of(kind)
    }

    /// Returns true if both handles refer to the same exception object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn cause(&self) -> Option<Self> {
        self.0.cause.borrow().clone()
    }

    /// Replaces the cause of this exception.
    ///
    /// Returns `false` and leaves the chain untouched if linking `cause` would make the
    /// chain cyclic.
    pub fn set_cause(&self, cause: Option<Self>) -> bool {
        if let Some(cause) = &cause
            && cause.chain().any(|link| link.ptr_eq(self))
        {
            return false;
        }
        *self.0.cause.borrow_mut() = cause;
        self.0.implicit.set(false);
        true
    }

    /// Links `cause` as the cause of this exception unless it already has one.
    ///
    /// Used when a new exception supersedes one that was in flight or being handled.
    /// Linking an exception to itself or creating a cycle is refused. The link is
    /// implicit: raising the exception again replaces it.
    pub(crate) fn chain_to(&self, cause: &Self) {
        if self.ptr_eq(cause) || self.0.cause.borrow().is_some() {
            return;
        }
        if self.set_cause(Some(cause.clone())) {
            self.0.implicit.set(true);
        }
    }

    /// Drops a cause linked by `chain_to`. Explicit causes stay.
    pub(crate) fn clear_implicit_cause(&self) {
        if self.0.implicit.replace(false) {
            self.0.cause.borrow_mut().take();
        }
    }

    /// Iterates over this exception and its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = Self> {
        std::iter::successors(Some(self.clone()), Self::cause)
    }

    /// Attaches or replaces a side-data field.
    pub fn set_field(&self, name: impl Into<String>, value: Value) {
        self.0.fields.borrow_mut().insert(name.into(), value);
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        self.0.fields.borrow().get(name).cloned()
    }

    /// Borrows the side-data map.
    #[must_use]
    pub fn fields(&self) -> Ref<'_, IndexMap<String, Value>> {
        self.0.fields.borrow()
    }

    /// Returns the recorded traceback, innermost frame first.
    #[must_use]
    pub fn traceback(&self) -> Vec<StackFrame> {
        self.0.traceback.borrow().clone()
    }

    /// Starts a fresh traceback at the raising frame.
    pub(crate) fn reset_traceback(&self, frame: StackFrame) {
        let mut traceback = self.0.traceback.borrow_mut();
        traceback.clear();
        traceback.push(frame);
    }

    /// Records a caller frame as the exception leaves a call.
    pub(crate) fn push_traceback(&self, frame: StackFrame) {
        self.0.traceback.borrow_mut().push(frame);
    }

    /// Builds the owned, serializable report of this exception and its cause chain.
    #[must_use]
    pub fn report(&self) -> Exception {
        Exception::from_ref(self)
    }
}

impl fmt::Display for ExceptionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {message}", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

impl fmt::Debug for ExceptionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionRef")
            .field("kind", &self.kind())
            .field("message", &self.message())
            .field("cause", &self.cause().map(|cause| cause.kind()))
            .finish_non_exhaustive()
    }
}

/// Runtime error types that can occur during execution.
///
/// The VM positions a fresh raise at the instruction that produced it (traceback and
/// implicit chaining) before unwinding; anything already positioned only propagates.
#[derive(Debug)]
pub(crate) enum RunError {
    /// Freshly raised at the current instruction.
    Raise(ExceptionRef),
    /// Already positioned: a bare re-raise or an exception leaving a callee.
    Propagate(ExceptionRef),
    /// Resource limit exception (TimeoutError).
    ///
    /// These skip every handler and cleanup on the way out so that untrusted code
    /// cannot keep running after its budget is spent.
    Uncatchable(ExceptionRef),
    /// Internal VM error - indicates a malformed program or a bug, not user code.
    Internal(Cow<'static, str>),
}

impl RunError {
    pub(crate) fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Converts the error into the exception handed to the harness.
    ///
    /// Internal errors are converted to `RuntimeError` exceptions with no traceback.
    pub(crate) fn into_exception(self) -> ExceptionRef {
        match self {
            Self::Raise(exc) | Self::Propagate(exc) | Self::Uncatchable(exc) => exc,
            Self::Internal(msg) => ExceptionRef::new(ExcKind::RuntimeError, format!("internal error in unwinder: {msg}")),
        }
    }
}

impl From<ExceptionRef> for RunError {
    fn from(exc: ExceptionRef) -> Self {
        Self::Raise(exc)
    }
}

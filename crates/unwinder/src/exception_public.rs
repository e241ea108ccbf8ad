use std::{fmt, rc::Rc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::exception_private::{ExcKind, ExceptionRef};

/// One traceback entry: the function an exception passed through and the instruction
/// offset it was at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    function: Rc<str>,
    offset: u32,
}

impl StackFrame {
    #[must_use]
    pub fn new(function: Rc<str>, offset: u32) -> Self {
        Self { function, offset }
    }

    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  in {} at offset {}", self.function, self.offset)
    }
}

/// Owned report of an exception that escaped to the harness.
///
/// Produced by [`ExceptionRef::report`]. Unlike the live handle it carries no identity:
/// side-data values are rendered to strings and the cause chain is copied, so the report
/// can be serialized, compared in tests, or printed after the execution context is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    kind: ExcKind,
    message: Option<String>,
    fields: IndexMap<String, String>,
    /// Innermost frame first.
    traceback: Vec<StackFrame>,
    cause: Option<Box<Exception>>,
}

impl Exception {
    pub(crate) fn from_ref(exc: &ExceptionRef) -> Self {
        let fields = exc
            .fields()
            .iter()
            .map(|(name, value)| (name.clone(), value.repr()))
            .collect();
        Self {
            kind: exc.kind(),
            message: exc.message().map(str::to_owned),
            fields,
            traceback: exc.traceback(),
            cause: exc.cause().map(|cause| Box::new(Self::from_ref(&cause))),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ExcKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }

    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }

    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    /// `Kind: message`, or just the kind when there is no message.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {message}", self.kind),
            None => self.kind.to_string(),
        }
    }

    fn fmt_one(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.traceback.is_empty() {
            writeln!(f, "Traceback (most recent call last):")?;
            for frame in self.traceback.iter().rev() {
                writeln!(f, "{frame}")?;
            }
        }
        write!(f, "{}", self.summary())
    }
}

impl fmt::Display for Exception {
    /// Renders the cause chain oldest first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cause) = &self.cause {
            write!(f, "{cause}")?;
            write!(
                f,
                "\n\nThe above exception was the direct cause of the following exception:\n\n"
            )?;
        }
        self.fmt_one(f)
    }
}

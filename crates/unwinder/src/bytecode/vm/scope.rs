//! Per-frame scope stack.
//!
//! Every guarded region of a frame pushes one entry here when entered and pops it exactly
//! once when left, whether by falling through, by `return` or by an exception. The unwinder
//! walks the stack from the top, so cleanups run innermost first.

use smallvec::SmallVec;
use strum::{Display, EnumDiscriminants, IntoStaticStr};

use crate::{
    exception_private::{ExcKind, ExceptionRef},
    types::{GeneratorRef, ManagerRef},
    value::Value,
};

/// Why control is leaving a region.
#[derive(Debug)]
pub(crate) enum Why {
    /// The region finished normally.
    Fallthrough,
    /// A `return` is on its way out of the frame with this value.
    Returning(Value),
    /// An exception is propagating.
    Raising(ExceptionRef),
}

impl Why {
    pub fn exception(&self) -> Option<&ExceptionRef> {
        match self {
            Self::Raising(exc) => Some(exc),
            _ => None,
        }
    }
}

/// One entry of a frame's scope stack.
///
/// `stack_depth` is the operand stack height when the entry was pushed; unwinding
/// through the entry truncates the operand stack back to it.
#[derive(Debug, EnumDiscriminants)]
#[strum_discriminants(name(ScopeKind), vis(pub), derive(Hash, Display, IntoStaticStr))]
pub(crate) enum ScopeEntry {
    /// Catch boundary for exceptions matching `kind`; the handler starts at `target`.
    Except {
        kind: ExcKind,
        target: usize,
        stack_depth: usize,
    },
    /// Finally handler starting at `target`.
    Finally { target: usize, stack_depth: usize },
    /// Pending `exit` obligation of a `with` block. A suppressed exception resumes at `target`.
    ContextManager {
        manager: ManagerRef,
        target: usize,
        stack_depth: usize,
    },
    /// Generator being iterated by this frame; closed if the loop is left early.
    LiveGenerator {
        generator: GeneratorRef,
        stack_depth: usize,
    },
    /// An except handler body is running for `exc`.
    Handling { exc: ExceptionRef, stack_depth: usize },
    /// A finally body is running; `why` resumes when it reaches `EndFinally`.
    Cleanup { why: Why, stack_depth: usize },
}

impl ScopeEntry {
    pub fn kind(&self) -> ScopeKind {
        ScopeKind::from(self)
    }

    pub fn stack_depth(&self) -> usize {
        match self {
            Self::Except { stack_depth, .. }
            | Self::Finally { stack_depth, .. }
            | Self::ContextManager { stack_depth, .. }
            | Self::LiveGenerator { stack_depth, .. }
            | Self::Handling { stack_depth, .. }
            | Self::Cleanup { stack_depth, .. } => *stack_depth,
        }
    }

    /// The exception this entry holds on the context's handled stack, if any.
    pub fn handled_exception(&self) -> Option<&ExceptionRef> {
        match self {
            Self::Handling { exc, .. } => Some(exc),
            Self::Cleanup { why, .. } => why.exception(),
            _ => None,
        }
    }
}

impl ScopeKind {
    /// True for entries whose removal runs code: finally bodies, `exit` calls and
    /// generator closes.
    #[must_use]
    pub fn is_cleanup(self) -> bool {
        matches!(self, Self::Finally | Self::ContextManager | Self::LiveGenerator)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ScopeStack {
    entries: SmallVec<[ScopeEntry; 4]>,
}

impl ScopeStack {
    pub fn push(&mut self, entry: ScopeEntry) {
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<ScopeEntry> {
        self.entries.pop()
    }

    pub fn top(&self) -> Option<&ScopeEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Exceptions pushed on the handled stack by this frame's active handlers, oldest first.
    pub fn handled_exceptions(&self) -> impl Iterator<Item = &ExceptionRef> {
        self.entries.iter().filter_map(ScopeEntry::handled_exception)
    }
}

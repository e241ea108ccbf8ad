//! Execution budgets: instruction count, wall-clock time and frame depth.
//!
//! Frames live on the VM's heap frame stack, so the depth limit is a policy rather than
//! native stack protection. Every frame counts toward it: calls, `with` enter and exit
//! bodies, generator resumes, closes and orphan finalizations. The check runs before the
//! frame is pushed, so a finally body or an `exit` reached at the limit fails to call
//! further functions with `RecursionError` but still runs its own instructions.
//!
//! Instruction and time budgets are checked before every instruction, cleanups included.
//! Running out raises an uncatchable `TimeoutError` that skips the remaining cleanups.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::exception_private::{ExcKind, ExceptionRef, RunError};

/// A budget ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// More instructions executed than `limit`.
    Operation { limit: usize, count: usize },
    /// The run took longer than `limit`.
    Time { limit: Duration, elapsed: Duration },
    /// Pushing another frame would have made the frame stack `depth` deep.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation { limit, count } => {
                write!(f, "operation limit exceeded: {count} > {limit}")
            }
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::Recursion { .. } => {
                write!(f, "maximum recursion depth exceeded")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// The exception raised in the running code: `TimeoutError` for the instruction and
    /// time budgets, `RecursionError` for depth.
    #[must_use]
    pub fn into_exception(self) -> ExceptionRef {
        let kind = match self {
            Self::Operation { .. } | Self::Time { .. } => ExcKind::TimeoutError,
            Self::Recursion { .. } => ExcKind::RecursionError,
        };
        ExceptionRef::new(kind, self.to_string())
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        // Depth errors are ordinary raises. An exhausted budget must not run more code.
        if matches!(err, ResourceError::Recursion { .. }) {
            Self::Raise(err.into_exception())
        } else {
            Self::Uncatchable(err.into_exception())
        }
    }
}

/// Budget policy consulted by the VM.
///
/// [`check_time`](Self::check_time) runs before each instruction.
/// [`check_recursion_depth`](Self::check_recursion_depth) runs before each frame push,
/// generator resumes and orphan finalizations included. An orphan that cannot get a frame
/// is reported as unraisable and discarded.
pub trait ResourceTracker: fmt::Debug {
    /// Counts one instruction against the instruction and time budgets.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// `current_depth` frames are running; fails if one more is not allowed.
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Instructions counted so far, when this tracker counts them.
    fn operation_count(&self) -> Option<usize> {
        None
    }
}

/// No instruction or time budget. Depth is still capped at [`DEFAULT_MAX_RECURSION_DEPTH`]
/// so runaway recursion ends in a catchable `RecursionError`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= DEFAULT_MAX_RECURSION_DEPTH {
            Err(ResourceError::Recursion {
                limit: DEFAULT_MAX_RECURSION_DEPTH,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }
}

/// Budgets for a [`LimitedTracker`]. `None` disables a budget.
///
/// `Default` disables everything; [`ResourceLimits::new`] keeps the default depth cap.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    pub max_operations: Option<usize>,
    pub max_duration: Option<Duration>,
    /// Frames allowed on the frame stack at once.
    pub max_recursion_depth: Option<usize>,
}

/// Depth cap used by [`NoLimitTracker`] and [`ResourceLimits::new`].
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

impl ResourceLimits {
    /// No instruction or time budget, depth capped at [`DEFAULT_MAX_RECURSION_DEPTH`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// `None` lets the frame stack grow until memory runs out.
    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }
}

/// Tracker enforcing a [`ResourceLimits`].
///
/// The clock starts at construction and restarts on deserialization; the instruction
/// count survives a round trip.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    #[serde(skip, default = "Instant::now")]
    start_time: Instant,
    #[serde(default)]
    operation_count: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            operation_count: 0,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl ResourceTracker for LimitedTracker {
    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_operations {
            self.operation_count += 1;
            if self.operation_count > limit {
                return Err(ResourceError::Operation {
                    limit,
                    count: self.operation_count,
                });
            }
        }
        if let Some(limit) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > limit {
                return Err(ResourceError::Time { limit, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        match self.limits.max_recursion_depth {
            Some(limit) if current_depth >= limit => Err(ResourceError::Recursion {
                limit,
                depth: current_depth + 1,
            }),
            _ => Ok(()),
        }
    }

    fn operation_count(&self) -> Option<usize> {
        self.limits.max_operations.map(|_| self.operation_count)
    }
}

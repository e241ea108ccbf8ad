//! VM execution tracing infrastructure.
//!
//! Provides a trait-based tracing system for the VM with zero-cost abstraction.
//! When using [`NoopTracer`], all trace methods compile away entirely via monomorphization,
//! the same way [`NoLimitTracker`](crate::resource::NoLimitTracker) eliminates resource
//! checking overhead.
//!
//! # Architecture
//!
//! The [`VmTracer`] trait defines hook points at key execution events: instruction
//! dispatch, frame push/pop, raises and catches, scope entries being pushed and popped,
//! exception suppression by context managers and generator state transitions.
//! Concrete implementations collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`ProfilingTracer`] | Opcode frequencies, call depth and unwind counters |
//! | [`CoverageTracer`] | Instruction offset coverage |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis and tests |
//!
//! # Usage
//!
//! The VM is parameterized as `VM<'a, T: ResourceTracker, H: Host, Tr: VmTracer>`.
//! Callers choose the tracer on the execution:
//!
//! ```ignore
//! let mut execution = runner.execution(&mut ctx, &mut host).with_tracer(ProfilingTracer::new());
//! execution.run()?;
//! println!("{}", execution.tracer().report());
//! ```

use ahash::{AHashMap, AHashSet};

use crate::{bytecode::Opcode, bytecode::ScopeKind, exception_private::ExcKind, types::GeneratorState};

/// Trace event emitted during VM execution.
///
/// Used by [`RecordingTracer`] to capture a full execution trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An instruction was dispatched at the given offset.
    Instruction {
        ip: usize,
        opcode: Opcode,
        /// Operand stack depth of the current frame at dispatch.
        stack_depth: usize,
    },
    /// A frame was pushed (call, class body, generator resume or finalization).
    Call {
        func_name: String,
        /// Frame stack depth after the push.
        depth: usize,
    },
    /// A frame was popped.
    Return {
        /// Frame stack depth after the pop.
        depth: usize,
    },
    /// An exception was freshly raised.
    Raise { kind: ExcKind, depth: usize },
    /// An except boundary caught an exception.
    Catch { kind: ExcKind, depth: usize },
    /// A scope entry was pushed.
    ScopePush {
        kind: ScopeKind,
        /// Scope stack depth of the current frame after the push.
        scope_depth: usize,
    },
    /// A scope entry was popped, either by normal exit or by unwinding.
    ScopePop { kind: ScopeKind, unwinding: bool },
    /// A context manager's `exit` suppressed the exception in flight.
    Suppress { kind: ExcKind },
    /// A generator changed state.
    Generator {
        name: String,
        from: GeneratorState,
        to: GeneratorState,
    },
    /// An exception could not be delivered and was reported as unraisable.
    Unraisable { kind: ExcKind },
}

/// Trait for VM execution tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code and compiles to zero instructions. Implementations only
/// override the hooks they care about.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each instruction dispatch.
    ///
    /// This is the hottest hook, called for every single instruction.
    /// Implementations should be as lightweight as possible.
    ///
    /// # Arguments
    /// * `ip` - Offset of the instruction in its code object
    /// * `opcode` - The opcode about to be executed
    /// * `stack_depth` - Number of values on the current frame's operand stack
    /// * `frame_depth` - Number of frames on the call stack
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a frame is pushed.
    ///
    /// # Arguments
    /// * `func_name` - Name of the function whose body the frame runs
    /// * `depth` - Call stack depth after the push
    #[inline(always)]
    fn on_call(&mut self, _func_name: &str, _depth: usize) {}

    /// Called when a frame is popped.
    ///
    /// # Arguments
    /// * `depth` - Call stack depth after the pop
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when an exception is freshly raised and positioned at an instruction.
    /// Re-raises and propagation into callers do not fire this hook.
    #[inline(always)]
    fn on_raise(&mut self, _kind: ExcKind, _depth: usize) {}

    /// Called when an except boundary catches an exception.
    #[inline(always)]
    fn on_catch(&mut self, _kind: ExcKind, _depth: usize) {}

    /// Called when a scope entry is pushed onto the current frame.
    #[inline(always)]
    fn on_scope_push(&mut self, _kind: ScopeKind, _scope_depth: usize) {}

    /// Called when a scope entry is popped.
    ///
    /// # Arguments
    /// * `kind` - Kind of the entry popped
    /// * `unwinding` - True when popped by an exception or `return`, false for `PopScope`
    #[inline(always)]
    fn on_scope_pop(&mut self, _kind: ScopeKind, _unwinding: bool) {}

    /// Called when a context manager's `exit` suppresses an exception.
    #[inline(always)]
    fn on_suppress(&mut self, _kind: ExcKind) {}

    /// Called on every generator state transition.
    #[inline(always)]
    fn on_generator(&mut self, _name: &str, _from: GeneratorState, _to: GeneratorState) {}

    /// Called when an exception raised while finalizing an orphaned generator is
    /// reported to the host instead of propagating.
    #[inline(always)]
    fn on_unraisable(&mut self, _kind: ExcKind) {}
}

// ============================================================================
// NoopTracer - zero-cost default
// ============================================================================

/// A tracer that does nothing.
///
/// All trait methods use the default no-op implementations, so every hook inlines
/// to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

// ============================================================================
// StderrTracer - human-readable execution log
// ============================================================================

/// Tracer that prints a human-readable execution log to stderr.
///
/// Output format:
/// ```text
/// [    0] SetupExcept       stack=0  frames=1
///   +++ SCOPE Except        depth=1
/// [    1] Call              stack=0  frames=1
///   >>> CALL wrapper        depth=2
/// [    0] Raise             stack=1  frames=2
///   !!! RAISE UserRaised    depth=2
///   --- SCOPE Finally       unwinding
/// ```
///
/// Useful for interactive debugging - pipe stderr to a file while stdout
/// shows normal program output.
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of instructions to trace before stopping (prevents
    /// runaway output on loops). None = unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    /// Creates a new stderr tracer with no instruction limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new stderr tracer that stops after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {opcode:<17} stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {func_name:<20} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN              depth={depth}");
        }
    }

    fn on_raise(&mut self, kind: ExcKind, depth: usize) {
        if !self.stopped {
            eprintln!("  !!! RAISE {kind:<19} depth={depth}");
        }
    }

    fn on_catch(&mut self, kind: ExcKind, depth: usize) {
        if !self.stopped {
            eprintln!("  *** CATCH {kind:<19} depth={depth}");
        }
    }

    fn on_scope_push(&mut self, kind: ScopeKind, scope_depth: usize) {
        if !self.stopped {
            eprintln!("  +++ SCOPE {kind:<19} depth={scope_depth}");
        }
    }

    fn on_scope_pop(&mut self, kind: ScopeKind, unwinding: bool) {
        if !self.stopped {
            let how = if unwinding { "unwinding" } else { "normal" };
            eprintln!("  --- SCOPE {kind:<19} {how}");
        }
    }

    fn on_suppress(&mut self, kind: ExcKind) {
        if !self.stopped {
            eprintln!("  ~~~ SUPPRESS {kind}");
        }
    }

    fn on_generator(&mut self, name: &str, from: GeneratorState, to: GeneratorState) {
        if !self.stopped {
            eprintln!("  ... GENERATOR {name} {from} -> {to}");
        }
    }

    fn on_unraisable(&mut self, kind: ExcKind) {
        eprintln!("  ??? UNRAISABLE {kind}");
    }
}

// ============================================================================
// ProfilingTracer - opcode frequency, call depth and unwind counters
// ============================================================================

/// Tracer that collects execution statistics for profiling.
///
/// Tracks:
/// - Per-opcode execution counts (which opcodes are hot)
/// - Total instruction count, maximum call depth and number of calls
/// - Raises, catches and suppressions
/// - Cleanups run while unwinding (finally bodies, `exit` calls, generator closes)
///
/// Retrieve results via [`ProfilingTracer::report`] after execution.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    opcode_counts: AHashMap<Opcode, u64>,
    total_instructions: u64,
    max_depth: usize,
    total_calls: u64,
    raises: u64,
    catches: u64,
    unwind_cleanups: u64,
    suppressions: u64,
    unraisable: u64,
}

/// Summary report from a profiling trace.
#[derive(Debug)]
pub struct ProfilingReport {
    /// Per-opcode execution counts, sorted by frequency (highest first).
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    pub max_depth: usize,
    pub total_calls: u64,
    pub raises: u64,
    pub catches: u64,
    /// Cleanup scopes popped while unwinding.
    pub unwind_cleanups: u64,
    pub suppressions: u64,
    pub unraisable: u64,
}

impl ProfilingTracer {
    /// Creates a new profiling tracer with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a profiling report from the collected data.
    ///
    /// Opcode counts are sorted by frequency (most executed first), ties by name.
    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            max_depth: self.max_depth,
            total_calls: self.total_calls,
            raises: self.raises,
            catches: self.catches,
            unwind_cleanups: self.unwind_cleanups,
            suppressions: self.suppressions,
            unraisable: self.unraisable,
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    #[inline]
    fn on_call(&mut self, _func_name: &str, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_raise(&mut self, _kind: ExcKind, _depth: usize) {
        self.raises += 1;
    }

    fn on_catch(&mut self, _kind: ExcKind, _depth: usize) {
        self.catches += 1;
    }

    fn on_scope_pop(&mut self, kind: ScopeKind, unwinding: bool) {
        if unwinding && kind.is_cleanup() {
            self.unwind_cleanups += 1;
        }
    }

    fn on_suppress(&mut self, _kind: ExcKind) {
        self.suppressions += 1;
    }

    fn on_unraisable(&mut self, _kind: ExcKind) {
        self.unraisable += 1;
    }
}

impl std::fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== VM Profiling Report ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Total calls:        {}", self.total_calls)?;
        writeln!(f, "Max call depth:     {}", self.max_depth)?;
        writeln!(f, "Raises:             {}", self.raises)?;
        writeln!(f, "Catches:            {}", self.catches)?;
        writeln!(f, "Unwind cleanups:    {}", self.unwind_cleanups)?;
        writeln!(f, "Suppressions:       {}", self.suppressions)?;
        writeln!(f, "Unraisable:         {}", self.unraisable)?;
        writeln!(f)?;
        writeln!(f, "--- Opcode Frequency ---")?;
        for (opcode, count) in &self.opcode_counts {
            let pct = (*count as f64 / self.total_instructions as f64) * 100.0;
            writeln!(f, "  {opcode:<20} {count:>10}  ({pct:>5.1}%)")?;
        }
        Ok(())
    }
}

// ============================================================================
// CoverageTracer - instruction offset coverage
// ============================================================================

/// Tracer that records which instruction offsets were executed, per function.
///
/// Retrieve results via [`CoverageTracer::covered`] after execution.
#[derive(Debug, Default)]
pub struct CoverageTracer {
    /// Name of the function whose frame is currently executing.
    current: Vec<String>,
    covered: AHashSet<(String, usize)>,
}

impl CoverageTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the instruction at `ip` in `func_name` was executed.
    #[must_use]
    pub fn covered(&self, func_name: &str, ip: usize) -> bool {
        self.covered.contains(&(func_name.to_owned(), ip))
    }

    /// Returns the number of unique (function, offset) pairs executed.
    #[must_use]
    pub fn coverage_count(&self) -> usize {
        self.covered.len()
    }
}

impl VmTracer for CoverageTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        if let Some(name) = self.current.last() {
            self.covered.insert((name.clone(), ip));
        }
    }

    fn on_call(&mut self, func_name: &str, _depth: usize) {
        self.current.push(func_name.to_owned());
    }

    fn on_return(&mut self, _depth: usize) {
        self.current.pop();
    }
}

// ============================================================================
// RecordingTracer - full event recording
// ============================================================================

/// Tracer that records all events.
///
/// Captures every trace event into a `Vec<TraceEvent>`. This is the most
/// expensive tracer (allocates per event), so use it for debugging or for
/// asserting on unwind order in tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
    /// Skip `Instruction` events, keeping only the structural ones.
    skip_instructions: bool,
}

impl RecordingTracer {
    /// Creates a new recording tracer with no event limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new recording tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
            skip_instructions: false,
        }
    }

    /// Creates a recording tracer that records everything except instruction dispatch.
    #[must_use]
    pub fn structural() -> Self {
        Self {
            skip_instructions: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|limit| self.events.len() < limit) {
            self.events.push(event);
        }
    }
}

impl VmTracer for RecordingTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, _frame_depth: usize) {
        if !self.skip_instructions {
            self.record(TraceEvent::Instruction {
                ip,
                opcode,
                stack_depth,
            });
        }
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        self.record(TraceEvent::Call {
            func_name: func_name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_raise(&mut self, kind: ExcKind, depth: usize) {
        self.record(TraceEvent::Raise { kind, depth });
    }

    fn on_catch(&mut self, kind: ExcKind, depth: usize) {
        self.record(TraceEvent::Catch { kind, depth });
    }

    fn on_scope_push(&mut self, kind: ScopeKind, scope_depth: usize) {
        self.record(TraceEvent::ScopePush { kind, scope_depth });
    }

    fn on_scope_pop(&mut self, kind: ScopeKind, unwinding: bool) {
        self.record(TraceEvent::ScopePop { kind, unwinding });
    }

    fn on_suppress(&mut self, kind: ExcKind) {
        self.record(TraceEvent::Suppress { kind });
    }

    fn on_generator(&mut self, name: &str, from: GeneratorState, to: GeneratorState) {
        self.record(TraceEvent::Generator {
            name: name.to_owned(),
            from,
            to,
        });
    }

    fn on_unraisable(&mut self, kind: ExcKind) {
        self.record(TraceEvent::Unraisable { kind });
    }
}

#![doc = include_str!("../../../README.md")]

mod bytecode;
mod context;
mod exception_private;
mod exception_public;
mod function;
mod host;
mod intern;
mod resource;
mod run;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    bytecode::{BuildError, Code, CodeBuilder, Const, Instr, JumpLabel, Opcode, ProgramBuilder, ScopeKind},
    context::ExecContext,
    exception_private::{ExcKind, ExceptionRef},
    exception_public::{Exception, StackFrame},
    function::FunctionKind,
    host::{CollectStringHost, Host, NoHost, StdHost, unknown_host_function},
    intern::{FunctionId, NameId},
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    run::{Execution, Program, Runner},
    tracer::{
        CoverageTracer, NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent,
        VmTracer,
    },
    types::{Callable, GeneratorRef, GeneratorState, GeneratorStep, ManagerRef},
    value::Value,
};

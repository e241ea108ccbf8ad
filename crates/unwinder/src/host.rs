use std::{
    borrow::Cow,
    io::{self, Write as _},
};

use crate::{
    exception_private::{ExcKind, ExceptionRef},
    value::Value,
};

/// The boundary between running code and the harness that drives it.
///
/// Counters, external resources and name lookup live on the host side. The VM reaches
/// them through `CallHost`, `Resolve`, `Print` and host-implemented context managers,
/// and reports exceptions it cannot deliver anywhere through
/// [`report_unraisable`](Host::report_unraisable).
pub trait Host {
    /// Calls a host function.
    ///
    /// Returning `Err` raises the exception at the calling instruction.
    /// The default implementation knows no functions.
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ExceptionRef> {
        let _ = args;
        Err(unknown_host_function(name))
    }

    /// Resolves a single name segment, `module` or `module.attr`.
    ///
    /// `None` means the name does not exist. The VM turns that into an
    /// `UnresolvedReference` exception with an import-style message.
    fn resolve(&mut self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }

    /// Called with the text of each `Print` instruction, without a trailing newline.
    fn print(&mut self, output: Cow<'_, str>) -> Result<(), ExceptionRef>;

    /// Receives exceptions raised while finalizing orphaned generators, where there is no
    /// caller left to propagate them to.
    fn report_unraisable(&mut self, exc: &ExceptionRef) {
        let _ = exc;
    }
}

/// The `UnresolvedReference` raised for a host function nobody provides.
#[must_use]
pub fn unknown_host_function(name: &str) -> ExceptionRef {
    ExceptionRef::new(ExcKind::UnresolvedReference, format!("host function '{name}' is not defined"))
}

/// Default `Host` that prints to stdout and reports unraisable exceptions on stderr.
#[derive(Debug, Default)]
pub struct StdHost;

impl Host for StdHost {
    fn print(&mut self, output: Cow<'_, str>) -> Result<(), ExceptionRef> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{output}").map_err(|err| ExceptionRef::new(ExcKind::RuntimeError, err.to_string()))
    }

    fn report_unraisable(&mut self, exc: &ExceptionRef) {
        eprintln!("Exception ignored in generator finalizer:\n{}", exc.report());
    }
}

/// A `Host` that collects all output into a string.
///
/// Useful for testing or capturing output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringHost {
    output: String,
    unraisable: Vec<ExceptionRef>,
}

impl CollectStringHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected output, one line per `Print`.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Consumes the host and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.output
    }

    /// Exceptions reported as unraisable, oldest first.
    #[must_use]
    pub fn unraisable(&self) -> &[ExceptionRef] {
        &self.unraisable
    }
}

impl Host for CollectStringHost {
    fn print(&mut self, output: Cow<'_, str>) -> Result<(), ExceptionRef> {
        self.output.push_str(&output);
        self.output.push('\n');
        Ok(())
    }

    fn report_unraisable(&mut self, exc: &ExceptionRef) {
        self.unraisable.push(exc.clone());
    }
}

/// `Host` that ignores all output.
#[derive(Debug, Default)]
pub struct NoHost;

impl Host for NoHost {
    fn print(&mut self, _output: Cow<'_, str>) -> Result<(), ExceptionRef> {
        Ok(())
    }
}

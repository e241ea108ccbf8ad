//! Shared test host for the integration tests.
#![allow(dead_code)]

use std::borrow::Cow;

use unwinder::{ExcKind, ExceptionRef, ExecContext, GeneratorRef, Host, ManagerRef, Program, Runner, Value};

/// Host with a shared counter, an event log and a few context managers.
///
/// Host functions:
/// - `tick()` increments the counter and returns the new value
/// - `reset()` sets the counter to zero
/// - `log(args...)` appends the space-joined arguments to `log`
/// - `fail()` raises `UserRaised("host failure")`
/// - `open(name)` returns a host manager named `name`
///
/// Managers: `mgr` logs `enter` and `exit <kind>`; its `exit` returns `suppress`.
/// `bad` fails in `enter`; `angry` fails in `exit`.
#[derive(Debug, Default)]
pub struct TestHost {
    pub counter: i64,
    pub log: Vec<String>,
    pub output: Vec<String>,
    pub suppress: bool,
    /// Names `Resolve` can find.
    pub names: Vec<&'static str>,
    /// Generator handed out by `Resolve("me")`.
    pub me: Option<GeneratorRef>,
    /// Exception handed out by `Resolve("shared")`.
    pub shared: Option<ExceptionRef>,
    pub unraisable: Vec<ExceptionRef>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<&str> {
        self.log.iter().map(String::as_str).collect()
    }
}

fn describe_exit(exc: Option<&Value>) -> String {
    match exc {
        Some(Value::Exception(exc)) => format!("exit {}", exc.kind()),
        _ => "exit None".to_owned(),
    }
}

impl Host for TestHost {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ExceptionRef> {
        match name {
            "tick" => {
                self.counter += 1;
                Ok(Value::Int(self.counter))
            }
            "reset" => {
                self.counter = 0;
                Ok(Value::None)
            }
            "log" => {
                let line = args.iter().map(Value::to_string).collect::<Vec<_>>().join(" ");
                self.log.push(line);
                Ok(Value::None)
            }
            "fail" => Err(ExceptionRef::new(ExcKind::UserRaised, "host failure")),
            "open" => {
                let manager_name = args.first().map(Value::to_string).unwrap_or_default();
                Ok(Value::Manager(ManagerRef::host(&manager_name, Value::None)))
            }
            "mgr.__enter__" => {
                self.log.push("enter".to_owned());
                Ok(Value::from("resource"))
            }
            "mgr.__exit__" => {
                self.log.push(describe_exit(args.get(1)));
                Ok(Value::Bool(self.suppress))
            }
            "bad.__enter__" => Err(ExceptionRef::new(ExcKind::UserRaised, "enter failed")),
            "bad.__exit__" => {
                self.log.push("bad exit".to_owned());
                Ok(Value::Bool(false))
            }
            "angry.__enter__" => Ok(Value::None),
            "angry.__exit__" => {
                self.log.push(describe_exit(args.get(1)));
                Err(ExceptionRef::new(ExcKind::UserRaised, "exit failed"))
            }
            _ => Err(unwinder::unknown_host_function(name)),
        }
    }

    fn resolve(&mut self, name: &str) -> Option<Value> {
        match name {
            "me" => self.me.clone().map(Value::Generator),
            "shared" => self.shared.clone().map(Value::Exception),
            _ => self.names.contains(&name).then(|| Value::from(name)),
        }
    }

    fn print(&mut self, output: Cow<'_, str>) -> Result<(), ExceptionRef> {
        self.output.push(output.into_owned());
        Ok(())
    }

    fn report_unraisable(&mut self, exc: &ExceptionRef) {
        self.unraisable.push(exc.clone());
    }
}

/// Runs the entry function of `program` on a fresh context.
pub fn run(program: Program, host: &mut TestHost) -> (Result<Value, ExceptionRef>, ExecContext) {
    let runner = Runner::new(program);
    let mut ctx = ExecContext::new();
    let result = runner.run(&mut ctx, host);
    (result, ctx)
}

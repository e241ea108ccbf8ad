use std::{env, process::ExitCode, time::Instant};

use unwinder::{ExceptionRef, ExecContext, NoopTracer, ProfilingTracer, StderrTracer, Value, VmTracer};

mod scenarios;

use scenarios::{DEFAULT_ITERATIONS, ScenarioHost};

const USAGE: &str = "usage: unwinder [exceptions-bench|with-class-raise|with-import] [--iterations N] [--json] [--trace] [--profile]";

#[derive(Debug)]
struct Options {
    scenario: String,
    iterations: i64,
    json: bool,
    trace: bool,
    profile: bool,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    if options.trace {
        run(&options, StderrTracer::new()).0
    } else if options.profile {
        let (code, tracer) = run(&options, ProfilingTracer::new());
        eprintln!("{}", tracer.report());
        code
    } else {
        run(&options, NoopTracer).0
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        scenario: "exceptions-bench".to_owned(),
        iterations: DEFAULT_ITERATIONS,
        json: false,
        trace: false,
        profile: false,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => options.json = true,
            "--trace" => options.trace = true,
            "--profile" => options.profile = true,
            "--iterations" => {
                let value = args.next().ok_or("--iterations needs a value")?;
                options.iterations = value
                    .parse()
                    .map_err(|err| format!("invalid --iterations '{value}': {err}"))?;
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{flag}'")),
            name => name.clone_into(&mut options.scenario),
        }
    }
    Ok(options)
}

fn run<Tr: VmTracer>(options: &Options, tracer: Tr) -> (ExitCode, Tr) {
    let scenario = match scenarios::build(&options.scenario, options.iterations) {
        Ok(scenario) => scenario,
        Err(err) => {
            eprintln!("error: {err}");
            return (ExitCode::FAILURE, tracer);
        }
    };
    let mut host = ScenarioHost::new();
    let mut ctx = ExecContext::new();

    let start = Instant::now();
    let mut execution = scenario
        .runner
        .execution(&mut ctx, &mut host)
        .with_tracer(tracer);
    let result = execution.call(scenario.entry, scenario.args);
    let tracer = execution.into_tracer();
    let elapsed = start.elapsed();

    let code = match result {
        Ok(value) => {
            if options.scenario == "exceptions-bench" {
                println!("counter: {}", host.counter);
            }
            if value != Value::None {
                println!("{}", value.repr());
            }
            eprintln!("success after: {elapsed:?}");
            ExitCode::SUCCESS
        }
        Err(exc) => {
            report_error(&exc, options.json);
            eprintln!("error after: {elapsed:?}");
            ExitCode::FAILURE
        }
    };
    (code, tracer)
}

fn report_error(exc: &ExceptionRef, json: bool) {
    let report = exc.report();
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("error: failed to serialize exception report: {err}"),
        }
    } else {
        eprintln!("{report}");
    }
}

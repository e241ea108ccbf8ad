//! Fuzz target: load an arbitrary serialized program and execute it.
//!
//! `Runner::load` accepts any bytes postcard can decode, so jump targets, local slots,
//! constant indices and function ids are all attacker-controlled. Malformed programs
//! must surface as exceptions, never as panics.
//!
//! Findings from this target indicate real safety issues: panics, stack overflows,
//! infinite loops that evade resource limits, or unbalanced handled-exception stacks.

#![no_main]

use libfuzzer_sys::fuzz_target;

use unwinder::{ExecContext, GeneratorStep, LimitedTracker, NoHost, ResourceLimits, Runner, Value};

fuzz_target!(|data: &[u8]| {
    if data.len() > 4096 {
        return;
    }

    // Decode failures are expected and not bugs.
    let Ok(runner) = Runner::load(data) else {
        return;
    };

    let limits = ResourceLimits::new()
        .max_operations(10_000)
        .max_recursion_depth(Some(50));
    let mut host = NoHost;
    let mut ctx = ExecContext::new();
    let mut execution = runner
        .execution(&mut ctx, &mut host)
        .with_tracker(LimitedTracker::new(limits));

    // A generator entry point is driven until it finishes or fails.
    if let Ok(Value::Generator(generator)) = execution.run() {
        while let Ok(GeneratorStep::Yielded(_)) = execution.advance(&generator) {}
        let _ = execution.close(&generator);
    }
    execution.reap_orphans();
    drop(execution);

    assert_eq!(ctx.handled_depth(), 0);
});

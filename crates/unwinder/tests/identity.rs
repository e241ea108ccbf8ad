//! Exceptions are shared objects: re-raising keeps identity, side-data and traceback.

mod common;

use common::{TestHost, run};
use pretty_assertions::assert_eq;
use unwinder::{ExcKind, ExceptionRef, ExecContext, FunctionKind, Instr, ProgramBuilder, Runner, Value};

#[test]
fn reraise_preserves_identity_and_side_data() {
    let mut program = ProgramBuilder::new();
    // def thrower(): e = UserRaised("payload"); e.code = 42; raise e
    let thrower = program.function("thrower", FunctionKind::Plain, 0, |b| {
        b.new_exception(ExcKind::UserRaised, Some("payload"));
        b.emit(Instr::Dup);
        b.load_const(42);
        b.set_field("code");
        b.emit(Instr::Raise);
    });
    // def middle():
    //     try: thrower()
    //     except UserRaised as e: e.note = "seen"; raise
    let middle = program.function("middle", FunctionKind::Plain, 0, |b| {
        let exc = b.new_local();
        b.try_except(
            ExcKind::UserRaised,
            Some(exc),
            |b| {
                b.call(thrower, 0);
                b.emit(Instr::Pop);
            },
            |b| {
                b.load_local(exc);
                b.load_const("seen");
                b.set_field("note");
                b.emit(Instr::Reraise);
            },
        );
    });
    // def main():
    //     try: middle()
    //     except UserRaised as e: return e
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        let exc = b.new_local();
        b.try_except(
            ExcKind::UserRaised,
            Some(exc),
            |b| {
                b.call(middle, 0);
                b.emit(Instr::Pop);
            },
            |b| {
                b.load_local(exc);
                b.emit(Instr::Return);
            },
        );
    });

    let mut host = TestHost::new();
    let (result, ctx) = run(program.build(main).unwrap(), &mut host);
    let Value::Exception(exc) = result.unwrap() else {
        panic!("main should return the caught exception");
    };

    assert_eq!(exc.kind(), ExcKind::UserRaised);
    assert_eq!(exc.message(), Some("payload"));
    assert_eq!(exc.field("code"), Some(Value::Int(42)));
    assert_eq!(exc.field("note"), Some(Value::from("seen")));
    assert!(exc.cause().is_none(), "re-raising the same object must not chain it to itself");

    // raised in thrower, left thrower into middle, re-raised and left middle into main
    let functions: Vec<String> = exc.traceback().iter().map(|f| f.function().to_owned()).collect();
    assert_eq!(functions, ["thrower", "middle", "main"]);

    assert_eq!(ctx.handled_depth(), 0);
    assert!(ctx.in_flight().is_none());
}

#[test]
fn raising_a_shared_object_repeatedly_keeps_one_traceback_entry() {
    let mut program = ProgramBuilder::new();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.resolve("shared");
        b.emit(Instr::Raise);
    });
    let runner = Runner::new(program.build(main).unwrap());

    let shared = ExceptionRef::new(ExcKind::UserRaised, "global");
    shared.set_field("attempts", Value::Int(0));
    let mut host = TestHost {
        shared: Some(shared.clone()),
        ..TestHost::new()
    };
    let mut ctx = ExecContext::new();

    for _ in 0..3 {
        let exc = runner.run(&mut ctx, &mut host).unwrap_err();
        assert!(exc.ptr_eq(&shared));
        assert_eq!(exc.traceback().len(), 1);
    }
    assert_eq!(shared.field("attempts"), Some(Value::Int(0)));
}

/// ```text
/// def first():
///     try: raise UserRaised("inner")
///     except UserRaised: raise shared
///
/// def second(): raise shared
///
/// def main():
///     try: first()
///     except UserRaised: pass
///     second()
/// ```
#[test]
fn raising_a_shared_object_again_drops_the_old_implicit_cause() {
    let mut program = ProgramBuilder::new();
    let first = program.function("first", FunctionKind::Plain, 0, |b| {
        b.try_except(
            ExcKind::UserRaised,
            None,
            |b| b.raise_new(ExcKind::UserRaised, "inner"),
            |b| {
                b.resolve("shared");
                b.emit(Instr::Raise);
            },
        );
    });
    let second = program.function("second", FunctionKind::Plain, 0, |b| {
        b.resolve("shared");
        b.emit(Instr::Raise);
    });
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.try_except(
            ExcKind::UserRaised,
            None,
            |b| {
                b.call(first, 0);
                b.emit(Instr::Pop);
            },
            |_| {},
        );
        b.call(second, 0);
        b.emit(Instr::Pop);
    });

    let shared = ExceptionRef::new(ExcKind::UserRaised, "global");
    let mut host = TestHost {
        shared: Some(shared.clone()),
        ..TestHost::new()
    };
    let (result, ctx) = run(program.build(main).unwrap(), &mut host);

    let exc = result.unwrap_err();
    assert!(exc.ptr_eq(&shared));
    assert!(exc.cause().is_none());
    let functions: Vec<String> = exc.traceback().iter().map(|frame| frame.function().to_owned()).collect();
    assert_eq!(functions, ["second", "main"]);
    assert_eq!(ctx.handled_depth(), 0);
}

#[test]
fn explicit_cause_survives_raising_inside_a_handler() {
    // def main():
    //     try: raise UserRaised("other")
    //     except UserRaised: raise shared
    let mut program = ProgramBuilder::new();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.try_except(
            ExcKind::UserRaised,
            None,
            |b| b.raise_new(ExcKind::UserRaised, "other"),
            |b| {
                b.resolve("shared");
                b.emit(Instr::Raise);
            },
        );
    });
    let runner = Runner::new(program.build(main).unwrap());

    let root = ExceptionRef::new(ExcKind::TypeError, "root");
    let shared = ExceptionRef::new(ExcKind::UserRaised, "global");
    assert!(shared.set_cause(Some(root.clone())));
    let mut host = TestHost {
        shared: Some(shared.clone()),
        ..TestHost::new()
    };
    let mut ctx = ExecContext::new();

    for _ in 0..2 {
        let exc = runner.run(&mut ctx, &mut host).unwrap_err();
        assert!(exc.ptr_eq(&shared));
        assert!(exc.cause().is_some_and(|cause| cause.ptr_eq(&root)));
    }
}

#[test]
fn missing_field_raises_unresolved_reference() {
    let mut program = ProgramBuilder::new();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.new_exception(ExcKind::UserRaised, None);
        b.get_field("nope");
        b.emit(Instr::Return);
    });

    let mut host = TestHost::new();
    let (result, _) = run(program.build(main).unwrap(), &mut host);
    let exc = result.unwrap_err();
    assert_eq!(exc.kind(), ExcKind::UnresolvedReference);
    assert_eq!(exc.message(), Some("'UserRaised' object has no field 'nope'"));
}

#[test]
fn raising_a_non_exception_is_a_type_error() {
    let mut program = ProgramBuilder::new();
    let main = program.function("main", FunctionKind::Plain, 0, |b| {
        b.load_const(7);
        b.emit(Instr::Raise);
    });

    let mut host = TestHost::new();
    let (result, _) = run(program.build(main).unwrap(), &mut host);
    let exc = result.unwrap_err();
    assert_eq!(exc.kind(), ExcKind::TypeError);
    assert_eq!(exc.message(), Some("exceptions must derive from BaseException, not 'int'"));
}

//! Evaluator integration tests: values, stepping, replay and limits.
//!
//! Each test builds a tree with `TreeBuilder`, hands it to an `Evaluator`,
//! and asserts on the pass result or on the state at some step index.

use quill_analysis::{ConflictKind, Type};
use quill_eval::{
    EngineConfig, EvalError, Evaluator, ExceptionKind, Status, Step, Value,
};
use quill_types::ast::{BinaryOperator, TypeAnnotation};
use quill_types::{Tree, TreeBuilder, Unit};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn run(tree: Tree) -> Value {
    Evaluator::new(tree).unwrap().evaluate()
}

fn run_with(tree: Tree, config: EngineConfig) -> Value {
    Evaluator::with_config(tree, config).unwrap().evaluate()
}

fn exception_kind(value: &Value) -> ExceptionKind {
    value
        .as_exception()
        .unwrap_or_else(|| panic!("expected an exception, got {value}"))
        .kind
        .clone()
}

fn n(x: f64) -> Value {
    Value::number(x)
}

/// A program whose only statement is the expression `build` returns.
fn expression(build: impl FnOnce(&mut TreeBuilder) -> quill_types::NodeId) -> Tree {
    let mut b = TreeBuilder::new();
    let end = build(&mut b);
    b.program(vec![end]).unwrap()
}

/// `ƒ fib(n•#) •# n ≤ 1 ? n fib(n - 1) + fib(n - 2)` then `fib(arg)`.
fn fib_program(arg: f64) -> Tree {
    let mut b = TreeBuilder::new();
    let n = b.input("n", Some(TypeAnnotation::number()));
    let n1 = b.reference("n");
    let one = b.number(1.0);
    let small = b.binary(n1, BinaryOperator::LessOrEqual, one);
    let n2 = b.reference("n");
    let n3 = b.reference("n");
    let one_again = b.number(1.0);
    let minus_one = b.binary(n3, BinaryOperator::Subtract, one_again);
    let left = b.call("fib", vec![minus_one]);
    let n4 = b.reference("n");
    let two = b.number(2.0);
    let minus_two = b.binary(n4, BinaryOperator::Subtract, two);
    let right = b.call("fib", vec![minus_two]);
    let sum = b.binary(left, BinaryOperator::Add, right);
    let cond = b.conditional(small, n2, sum);
    let body = b.block(vec![cond]);
    let fib = b.function("fib", vec![n], Some(TypeAnnotation::number()), Some(body));
    let arg = b.number(arg);
    let call = b.call("fib", vec![arg]);
    b.program(vec![fib, call]).unwrap()
}

/// `•Cat(name•'' lives•#) ( ƒ older() lives + 1  → Cat '' this.name )`
/// followed by `tom: Cat('Tom' 9)` and whatever `end` builds.
fn cat_program(end: impl FnOnce(&mut TreeBuilder) -> quill_types::NodeId) -> Tree {
    let mut b = TreeBuilder::new();
    let lives = b.reference("lives");
    let one = b.number(1.0);
    let plus = b.binary(lives, BinaryOperator::Add, one);
    let older_body = b.block(vec![plus]);
    let older = b.function("older", vec![], None, Some(older_body));
    let this = b.this();
    let this_name = b.property(this, "name");
    let to_text = b.conversion(TypeAnnotation::named("Cat"), TypeAnnotation::Text, this_name);
    let name = b.input("name", Some(TypeAnnotation::Text));
    let lives_input = b.input("lives", Some(TypeAnnotation::number()));
    let cat = b.structure("Cat", vec![name, lives_input], Some(vec![older, to_text]));
    let tom_name = b.text("Tom");
    let nine = b.number(9.0);
    let make = b.call("Cat", vec![tom_name, nine]);
    let tom = b.bind("tom", None, make);
    let end = end(&mut b);
    b.program(vec![cat, tom, end]).unwrap()
}

/// Step through a fresh pass, recording the frame depth and top value
/// after every step.
fn record_states(evaluator: &mut Evaluator) -> Vec<(usize, Option<Value>)> {
    let mut states = vec![(evaluator.frame_depth(), evaluator.current_value().cloned())];
    while evaluator.step().is_some() {
        states.push((evaluator.frame_depth(), evaluator.current_value().cloned()));
    }
    states
}

// ══════════════════════════════════════════════════════════════════════════════
// Values
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn recursion_evaluates() {
    assert_eq!(run(fib_program(5.0)), n(5.0));
    assert_eq!(run(fib_program(10.0)), n(55.0));
}

#[test]
fn list_equality() {
    let eq = |left: &[f64], op: BinaryOperator, right: &[f64]| {
        let (left, right) = (left.to_vec(), right.to_vec());
        run(expression(|b| {
            let l: Vec<_> = left.iter().map(|x| b.number(*x)).collect();
            let r: Vec<_> = right.iter().map(|x| b.number(*x)).collect();
            let l = b.list(l);
            let r = b.list(r);
            b.binary(l, op, r)
        }))
    };
    assert_eq!(eq(&[], BinaryOperator::Equal, &[]), Value::Boolean(true));
    assert_eq!(eq(&[1.0], BinaryOperator::Equal, &[1.0]), Value::Boolean(true));
    assert_eq!(eq(&[1.0], BinaryOperator::Equal, &[1.0, 2.0]), Value::Boolean(false));
    assert_eq!(eq(&[1.0, 2.0], BinaryOperator::NotEqual, &[1.0]), Value::Boolean(true));
}

#[test]
fn text_method_call() {
    let value = run(expression(|b| {
        let ab = b.text("ab");
        let three = b.number(3.0);
        b.method(ab, "repeat", vec![three])
    }));
    assert_eq!(value, Value::text("ababab"));
}

#[test]
fn text_method_on_number_is_type_mismatch() {
    let value = run(expression(|b| {
        let one = b.number(1.0);
        b.method(one, "length", vec![])
    }));
    assert_eq!(
        exception_kind(&value),
        ExceptionKind::TypeMismatch {
            expected: Type::Text,
            received: n(1.0),
        }
    );
}

#[test]
fn huge_repeat_is_an_exception() {
    let mut evaluator = Evaluator::new(expression(|b| {
        let ab = b.text("ab");
        let huge = b.number(1e20);
        b.method(ab, "repeat", vec![huge])
    }))
    .unwrap();
    let value = evaluator.evaluate();
    assert_eq!(
        exception_kind(&value),
        ExceptionKind::TextTooLong {
            limit: quill_eval::native::MAX_TEXT_BYTES,
        }
    );
    assert_eq!(evaluator.status(), Status::Exception);
}

#[test]
fn list_access_is_one_based() {
    let access = |index: f64| {
        run(expression(|b| {
            let ten = b.number(10.0);
            let twenty = b.number(20.0);
            let list = b.list(vec![ten, twenty]);
            let index = b.number(index);
            b.list_access(list, index)
        }))
    };
    assert_eq!(access(1.0), n(10.0));
    assert_eq!(access(2.0), n(20.0));
    assert_eq!(access(3.0), Value::None);
}

#[test]
fn type_tests_check_runtime_types() {
    let value = run(expression(|b| {
        let one = b.number(1.0);
        let is_number = b.is(one, TypeAnnotation::number());
        let x = b.text("x");
        let is_text_number = b.is(x, TypeAnnotation::number());
        b.list(vec![is_number, is_text_number])
    }));
    assert_eq!(
        value,
        Value::List(vec![Value::Boolean(true), Value::Boolean(false)])
    );
}

#[test]
fn units_flow_through_arithmetic() {
    let value = run(expression(|b| {
        let distance = b.measurement(6.0, Unit::of("m"));
        let time = b.measurement(2.0, Unit::of("s"));
        b.binary(distance, BinaryOperator::Divide, time)
    }));
    assert_eq!(value, Value::measurement(3.0, Unit::of("m").quotient(&Unit::of("s"))));
    assert_eq!(value.to_string(), "3m/s");
}

#[test]
fn set_and_map_literals() {
    let value = run(expression(|b| {
        let one = b.number(1.0);
        let again = b.number(1.0);
        b.set(vec![one, again])
    }));
    assert_eq!(value, Value::set(vec![n(1.0)]));

    let value = run(expression(|b| {
        let key = b.text("a");
        let first = b.number(1.0);
        let same_key = b.text("a");
        let second = b.number(2.0);
        b.map(vec![(key, first), (same_key, second)])
    }));
    assert_eq!(value, Value::map(vec![(Value::text("a"), n(2.0))]));
}

// ══════════════════════════════════════════════════════════════════════════════
// Structures and conversions
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn structure_construction_and_display() {
    let value = run(cat_program(|b| b.reference("tom")));
    let Value::Structure(tom) = &value else {
        panic!("expected a structure, got {value}");
    };
    assert_eq!(tom.name(), "Cat");
    assert_eq!(tom.resolve("lives"), Some(&n(9.0)));
    assert_eq!(value.to_string(), "Cat(name: 'Tom' lives: 9)");
}

#[test]
fn structure_function_closes_over_inputs() {
    let value = run(cat_program(|b| {
        let tom = b.reference("tom");
        b.method(tom, "older", vec![])
    }));
    assert_eq!(value, n(10.0));
}

#[test]
fn structure_property_reads_input() {
    let value = run(cat_program(|b| {
        let tom = b.reference("tom");
        b.property(tom, "name")
    }));
    assert_eq!(value, Value::text("Tom"));
}

#[test]
fn unknown_structure_property_is_name_not_found() {
    let value = run(cat_program(|b| {
        let tom = b.reference("tom");
        b.property(tom, "whiskers")
    }));
    assert_eq!(
        exception_kind(&value),
        ExceptionKind::NameNotFound {
            name: "whiskers".into()
        }
    );
}

#[test]
fn structure_conversion_runs_with_this() {
    let value = run(cat_program(|b| {
        let tom = b.reference("tom");
        b.convert(tom, TypeAnnotation::Text)
    }));
    assert_eq!(value, Value::text("Tom"));
}

#[test]
fn program_conversion() {
    // `→ ? # this ? 1 0` then `⊤ → #`
    let mut b = TreeBuilder::new();
    let this = b.this();
    let one = b.number(1.0);
    let zero = b.number(0.0);
    let pick = b.conditional(this, one, zero);
    let conversion = b.conversion(TypeAnnotation::Boolean, TypeAnnotation::number(), pick);
    let yes = b.boolean(true);
    let convert = b.convert(yes, TypeAnnotation::number());
    let tree = b.program(vec![conversion, convert]).unwrap();
    assert_eq!(run(tree), n(1.0));
}

#[test]
fn native_and_identity_conversions() {
    let value = run(expression(|b| {
        let text = b.text("12");
        b.convert(text, TypeAnnotation::number())
    }));
    assert_eq!(value, n(12.0));

    let value = run(expression(|b| {
        let text = b.text("same");
        b.convert(text, TypeAnnotation::Text)
    }));
    assert_eq!(value, Value::text("same"));
}

#[test]
fn missing_conversion_is_exception() {
    let value = run(expression(|b| {
        let yes = b.boolean(true);
        b.convert(yes, TypeAnnotation::number())
    }));
    assert_eq!(
        exception_kind(&value),
        ExceptionKind::ConversionNotFound {
            input: Type::Boolean,
            output: Type::Measurement(None),
        }
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Exceptions
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn unknown_name_is_exception_value() {
    let mut evaluator = Evaluator::new(expression(|b| b.reference("nowhere"))).unwrap();
    let value = evaluator.evaluate();
    assert_eq!(
        exception_kind(&value),
        ExceptionKind::NameNotFound {
            name: "nowhere".into()
        }
    );
    assert_eq!(evaluator.status(), Status::Exception);
    assert_eq!(evaluator.frame_depth(), 0);
}

#[test]
fn missing_input_is_value_required() {
    let mut b = TreeBuilder::new();
    let a = b.input("a", Some(TypeAnnotation::number()));
    let body_ref = b.reference("a");
    let body = b.block(vec![body_ref]);
    let f = b.function("f", vec![a], None, Some(body));
    let call = b.call("f", vec![]);
    let tree = b.program(vec![f, call]).unwrap();
    assert_eq!(
        exception_kind(&run(tree)),
        ExceptionKind::ValueRequired { name: "a".into() }
    );
}

#[test]
fn default_inputs_are_evaluated_when_missing() {
    let mut b = TreeBuilder::new();
    let two = b.number(2.0);
    let a = b.bind("a", None, two);
    let a_ref = b.reference("a");
    let ten = b.number(10.0);
    let times = b.binary(a_ref, BinaryOperator::Multiply, ten);
    let body = b.block(vec![times]);
    let f = b.function("f", vec![a], None, Some(body));
    let defaulted = b.call("f", vec![]);
    let three = b.number(3.0);
    let given = b.call("f", vec![three]);
    let both = b.list(vec![defaulted, given]);
    let tree = b.program(vec![f, both]).unwrap();
    assert_eq!(run(tree), Value::List(vec![n(20.0), n(30.0)]));
}

#[test]
fn exception_in_nested_call_ends_the_pass() {
    // `ƒ bad() •# 'x' + 1` then `[1 bad()]`
    let mut b = TreeBuilder::new();
    let x = b.text("x");
    let one = b.number(1.0);
    let sum = b.binary(x, BinaryOperator::Add, one);
    let body = b.block(vec![sum]);
    let bad = b.function("bad", vec![], None, Some(body));
    let first = b.number(1.0);
    let call = b.call("bad", vec![]);
    let list = b.list(vec![first, call]);
    let tree = b.program(vec![bad, list]).unwrap();
    let value = run(tree);
    let exception = value.as_exception().unwrap();
    assert_eq!(
        exception.kind,
        ExceptionKind::TypeMismatch {
            expected: Type::Measurement(None),
            received: Value::text("x"),
        }
    );
    assert_eq!(exception.kind.name(), "TypeMismatch");
}

// ══════════════════════════════════════════════════════════════════════════════
// Limits
// ══════════════════════════════════════════════════════════════════════════════

/// `ƒ forever(n•#) •# forever(n + 1)` then `forever(1)`.
fn forever_program() -> Tree {
    let mut b = TreeBuilder::new();
    let n = b.input("n", Some(TypeAnnotation::number()));
    let n_ref = b.reference("n");
    let one = b.number(1.0);
    let next = b.binary(n_ref, BinaryOperator::Add, one);
    let again = b.call("forever", vec![next]);
    let body = b.block(vec![again]);
    let forever = b.function("forever", vec![n], Some(TypeAnnotation::number()), Some(body));
    let start = b.number(1.0);
    let call = b.call("forever", vec![start]);
    b.program(vec![forever, call]).unwrap()
}

#[test]
fn step_limit() {
    let config = EngineConfig {
        max_steps: 10,
        ..EngineConfig::default()
    };
    let mut evaluator = Evaluator::with_config(fib_program(5.0), config).unwrap();
    let value = evaluator.evaluate();
    assert_eq!(exception_kind(&value), ExceptionKind::StepLimit);
    assert_eq!(evaluator.step_count(), 11);
}

#[test]
fn call_depth_limit() {
    let value = run(forever_program());
    assert_eq!(exception_kind(&value), ExceptionKind::CallDepthLimit);
}

#[test]
fn evaluation_limit() {
    let config = EngineConfig {
        max_evaluations_per_function: 10,
        ..EngineConfig::default()
    };
    let value = run_with(fib_program(5.0), config);
    assert_eq!(
        exception_kind(&value),
        ExceptionKind::EvaluationLimit {
            function: "fib".into()
        }
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Stepping and replay
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn fresh_evaluator_is_ready() {
    let tree = fib_program(5.0);
    let root = tree.root();
    let mut evaluator = Evaluator::new(tree).unwrap();
    assert_eq!(evaluator.status(), Status::Ready);
    assert_eq!(evaluator.step_index(), 0);
    assert_eq!(evaluator.frame_depth(), 1);
    assert_eq!(evaluator.current_step(), Some(Step::Start(root)));
    assert_eq!(evaluator.result(), None);

    assert_eq!(evaluator.step(), Some(Step::Start(root)));
    assert_eq!(evaluator.status(), Status::Running);
    assert_eq!(evaluator.step_index(), 1);
}

#[test]
fn evaluate_completes_and_stops() {
    let mut evaluator = Evaluator::new(fib_program(5.0)).unwrap();
    assert_eq!(evaluator.evaluate(), n(5.0));
    assert_eq!(evaluator.status(), Status::Completed);
    assert_eq!(evaluator.frame_depth(), 0);
    assert_eq!(evaluator.step(), None);
    assert_eq!(evaluator.step_index(), evaluator.step_count());
    assert_eq!(evaluator.result(), Some(&n(5.0)));
}

#[test]
fn stepping_back_and_forward_restores_state() {
    let mut evaluator = Evaluator::new(fib_program(5.0)).unwrap();
    let states = record_states(&mut evaluator);
    let total = evaluator.step_count();
    assert_eq!(states.len(), total + 1);

    for back in [0, 1, 10, 15, total / 2, total] {
        evaluator.step_to(total);
        evaluator.step_back(back);
        let index = total - back;
        assert_eq!(evaluator.step_index(), index);
        assert_eq!(
            (evaluator.frame_depth(), evaluator.current_value().cloned()),
            states[index],
            "state differs after stepping back {back}"
        );

        for _ in 0..back {
            assert!(evaluator.step().is_some());
        }
        assert_eq!(evaluator.step_index(), total);
        assert_eq!(evaluator.current_value(), Some(&n(5.0)));
    }
    assert_eq!(evaluator.step_count(), total, "replay must not grow the log");
}

#[test]
fn step_to_matches_every_index() {
    for interval in [1, 3, 64] {
        let config = EngineConfig {
            snapshot_interval: interval,
            ..EngineConfig::default()
        };
        let mut evaluator = Evaluator::with_config(fib_program(4.0), config).unwrap();
        let states = record_states(&mut evaluator);
        for index in (0..states.len()).rev() {
            evaluator.step_to(index);
            assert_eq!(
                (evaluator.frame_depth(), evaluator.current_value().cloned()),
                states[index],
                "interval {interval}, index {index}"
            );
        }
    }
}

#[test]
fn step_to_clamps_to_log() {
    let mut evaluator = Evaluator::new(fib_program(3.0)).unwrap();
    evaluator.evaluate();
    let total = evaluator.step_count();
    evaluator.step_to(0);
    assert_eq!(evaluator.step_index(), 0);
    evaluator.step_to(total + 100);
    assert_eq!(evaluator.step_index(), total);
    evaluator.step_back(total + 100);
    assert_eq!(evaluator.step_index(), 0);
}

#[test]
fn long_recursion_runs_and_replays() {
    // Roughly 200 000 steps, a snapshot every 64 of them.
    let mut evaluator = Evaluator::new(fib_program(18.0)).unwrap();
    assert_eq!(evaluator.evaluate(), n(2584.0));
    let total = evaluator.step_count();
    assert!(total > 150_000, "{total} steps");

    evaluator.step_to(total / 2);
    assert_eq!(evaluator.step_index(), total / 2);
    assert!(evaluator.frame_depth() > 1);
    evaluator.step_to(total);
    assert_eq!(evaluator.current_value(), Some(&n(2584.0)));
    assert_eq!(evaluator.step_count(), total);
}

#[test]
fn evaluation_is_deterministic() {
    let mut first = Evaluator::new(fib_program(6.0)).unwrap();
    let mut second = Evaluator::new(fib_program(6.0)).unwrap();
    assert_eq!(first.evaluate(), second.evaluate());
    assert_eq!(first.step_count(), second.step_count());
    assert_eq!(
        first.log().fingerprint().unwrap(),
        second.log().fingerprint().unwrap()
    );

    let count = first.step_count();
    assert_eq!(first.restart(), n(8.0));
    assert_eq!(first.step_count(), count);
}

#[test]
fn log_serializes_to_json() {
    let mut evaluator = Evaluator::new(fib_program(2.0)).unwrap();
    evaluator.evaluate();
    let json = serde_json::to_string(evaluator.log()).unwrap();
    let back: quill_eval::StepLog = serde_json::from_str(&json).unwrap();
    assert_eq!(&back, evaluator.log());
}

// ══════════════════════════════════════════════════════════════════════════════
// Setup
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn fatal_conflicts_block_evaluation() {
    let mut b = TreeBuilder::new();
    let one = b.number(1.0);
    let x = b.bind("x", None, one);
    let two = b.number(2.0);
    let x_again = b.bind("x", None, two);
    let end = b.reference("x");
    let tree = b.program(vec![x, x_again, end]).unwrap();
    match Evaluator::new(tree) {
        Err(EvalError::Conflicts(conflicts)) => {
            assert!(conflicts.has_fatal());
            assert!(!conflicts.of_kind(ConflictKind::DuplicateName).is_empty());
        }
        other => panic!("expected fatal conflicts, got {other:?}"),
    }
}

#[test]
fn advisory_conflicts_are_kept() {
    let mut b = TreeBuilder::new();
    let one = b.number(1.0);
    let unused = b.bind("unused", None, one);
    let end = b.number(2.0);
    let tree = b.program(vec![unused, end]).unwrap();
    let mut evaluator = Evaluator::new(tree).unwrap();
    assert_eq!(evaluator.conflicts().of_kind(ConflictKind::UnusedBind).len(), 1);
    assert_eq!(evaluator.evaluate(), n(2.0));
}

#[test]
fn invalid_config_is_rejected() {
    let config = EngineConfig {
        snapshot_interval: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Evaluator::with_config(fib_program(1.0), config),
        Err(EvalError::InvalidConfig(_))
    ));
}

#[test]
fn config_from_json() {
    let config = EngineConfig::from_json(r#"{ "max_steps": 10 }"#).unwrap();
    assert_eq!(config.max_steps, 10);
    assert_eq!(config.snapshot_interval, EngineConfig::default().snapshot_interval);
    let value = run_with(fib_program(5.0), config);
    assert_eq!(exception_kind(&value), ExceptionKind::StepLimit);
}

//! Flow-sensitive narrowing tests.
//!
//! Each test assembles a small program with `TreeBuilder` and asserts on the
//! static type the context reports for individual name accesses.

use std::rc::Rc;

use quill_analysis::{Context, Type};
use quill_types::ast::{BinaryOperator, TypeAnnotation, UnaryOperator};
use quill_types::{NodeId, TreeBuilder};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn text_or_none() -> TypeAnnotation {
    TypeAnnotation::union(TypeAnnotation::Text, TypeAnnotation::None)
}

fn text_number_none() -> TypeAnnotation {
    TypeAnnotation::union(
        TypeAnnotation::Text,
        TypeAnnotation::union(TypeAnnotation::number(), TypeAnnotation::None),
    )
}

/// `x•annotation: 'hi'` followed by whatever `rest` builds.
fn with_x(
    annotation: TypeAnnotation,
    rest: impl FnOnce(&mut TreeBuilder) -> (NodeId, Vec<NodeId>),
) -> (Context, Vec<NodeId>) {
    let mut b = TreeBuilder::new();
    let value = b.text("hi");
    let bind = b.bind("x", Some(annotation), value);
    let (last, reads) = rest(&mut b);
    let tree = b.program(vec![bind, last]).unwrap();
    (Context::new(Rc::new(tree)), reads)
}

// ══════════════════════════════════════════════════════════════════════════════
// Single guard
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn is_guard_splits_union_between_branches() {
    let (ctx, reads) = with_x(text_or_none(), |b| {
        let subject = b.reference("x");
        let test = b.is(subject, TypeAnnotation::Text);
        let yes = b.reference("x");
        let no = b.reference("x");
        (b.conditional(test, yes, no), vec![subject, yes, no])
    });
    // The guarded name itself is not narrowed.
    assert_eq!(ctx.type_of(reads[0]), Type::union(Type::Text, Type::None));
    assert_eq!(ctx.type_of(reads[1]), Type::Text);
    assert_eq!(ctx.type_of(reads[2]), Type::None);
    assert!(ctx.conflicts().is_empty(), "{:?}", ctx.conflicts());
}

#[test]
fn unguarded_access_keeps_declared_type() {
    let (ctx, reads) = with_x(text_or_none(), |b| {
        let flag = b.boolean(true);
        let yes = b.reference("x");
        let no = b.none();
        (b.conditional(flag, yes, no), vec![yes])
    });
    assert_eq!(ctx.type_of(reads[0]), Type::union(Type::Text, Type::None));
}

#[test]
fn negated_guard_swaps_branches() {
    let (ctx, reads) = with_x(text_or_none(), |b| {
        let subject = b.reference("x");
        let test = b.is(subject, TypeAnnotation::Text);
        let not = b.unary(UnaryOperator::Not, test);
        let yes = b.reference("x");
        let no = b.reference("x");
        (b.conditional(not, yes, no), vec![yes, no])
    });
    assert_eq!(ctx.type_of(reads[0]), Type::None);
    assert_eq!(ctx.type_of(reads[1]), Type::Text);
}

// ══════════════════════════════════════════════════════════════════════════════
// Nested and compound guards
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn nested_guards_narrow_in_execution_order() {
    let (ctx, reads) = with_x(text_number_none(), |b| {
        let outer_subject = b.reference("x");
        let outer_test = b.is(outer_subject, TypeAnnotation::Text);
        let outer_yes = b.reference("x");

        let inner_subject = b.reference("x");
        let inner_test = b.is(inner_subject, TypeAnnotation::number());
        let inner_yes = b.reference("x");
        let inner_no = b.reference("x");
        let inner = b.conditional(inner_test, inner_yes, inner_no);

        (
            b.conditional(outer_test, outer_yes, inner),
            vec![outer_yes, inner_subject, inner_yes, inner_no],
        )
    });
    assert_eq!(ctx.type_of(reads[0]), Type::Text);
    // Inside the outer `no` branch, text is already ruled out.
    assert_eq!(
        ctx.type_of(reads[1]),
        Type::union(Type::Measurement(None), Type::None)
    );
    assert_eq!(ctx.type_of(reads[2]), Type::Measurement(None));
    assert_eq!(ctx.type_of(reads[3]), Type::None);
}

#[test]
fn conjunction_narrows_yes_branch_only() {
    let (ctx, reads) = with_x(text_or_none(), |b| {
        let subject = b.reference("x");
        let test = b.is(subject, TypeAnnotation::Text);
        let also = b.boolean(true);
        let both = b.binary(test, BinaryOperator::And, also);
        let yes = b.reference("x");
        let no = b.reference("x");
        (b.conditional(both, yes, no), vec![yes, no])
    });
    assert_eq!(ctx.type_of(reads[0]), Type::Text);
    assert_eq!(ctx.type_of(reads[1]), Type::union(Type::Text, Type::None));
}

#[test]
fn disjunction_narrows_no_branch_only() {
    let (ctx, reads) = with_x(text_number_none(), |b| {
        let a = b.reference("x");
        let is_text = b.is(a, TypeAnnotation::Text);
        let c = b.reference("x");
        let is_none = b.is(c, TypeAnnotation::None);
        let either = b.binary(is_text, BinaryOperator::Or, is_none);
        let yes = b.reference("x");
        let no = b.reference("x");
        (b.conditional(either, yes, no), vec![yes, no])
    });
    assert_eq!(
        ctx.type_of(reads[0]),
        Type::union(Type::Text, Type::union(Type::Measurement(None), Type::None))
    );
    assert_eq!(ctx.type_of(reads[1]), Type::Measurement(None));
}

#[test]
fn guard_on_other_name_does_not_narrow() {
    let mut b = TreeBuilder::new();
    let x_value = b.text("a");
    let x = b.bind("x", Some(text_or_none()), x_value);
    let y_value = b.none();
    let y = b.bind("y", Some(text_or_none()), y_value);
    let subject = b.reference("y");
    let test = b.is(subject, TypeAnnotation::Text);
    let yes = b.reference("x");
    let no = b.reference("y");
    let cond = b.conditional(test, yes, no);
    let tree = b.program(vec![x, y, cond]).unwrap();
    let ctx = Context::new(Rc::new(tree));

    assert_eq!(ctx.type_of(yes), Type::union(Type::Text, Type::None));
    assert_eq!(ctx.type_of(no), Type::None);
}

// ══════════════════════════════════════════════════════════════════════════════
// Structure properties
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn structure_property_is_narrowed() {
    let mut b = TreeBuilder::new();
    let name = b.input("name", Some(text_or_none()));
    let cat = b.structure("Cat", vec![name], None);
    let arg = b.text("Tom");
    let make = b.call("Cat", vec![arg]);
    let c = b.bind("c", None, make);

    let subject_ref = b.reference("c");
    let subject = b.property(subject_ref, "name");
    let test = b.is(subject, TypeAnnotation::Text);
    let yes_ref = b.reference("c");
    let yes = b.property(yes_ref, "name");
    let no = b.text("anonymous");
    let cond = b.conditional(test, yes, no);
    let tree = b.program(vec![cat, c, cond]).unwrap();
    let ctx = Context::new(Rc::new(tree));

    assert_eq!(ctx.type_of(subject), Type::union(Type::Text, Type::None));
    assert_eq!(ctx.type_of(yes), Type::Text);
    assert_eq!(ctx.type_of(cond), Type::Text);
    assert_eq!(ctx.type_of(make), ctx.structure_type(cat));
}

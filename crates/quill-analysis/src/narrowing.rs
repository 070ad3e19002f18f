//! Flow-sensitive narrowing of union-typed names.
//!
//! Inside `x•A ? yes no`, an access to `x` in `yes` can only see the members
//! of `x`'s declared type that `A` accepts, and in `no` only the rest. The
//! narrowed type of an access is found by walking its enclosing conditionals
//! outermost first and refining a [`TypeSet`] at each guard.

use quill_types::ast::{BinaryOperator, NodeKind, UnaryOperator};
use quill_types::NodeId;

use crate::context::Context;
use crate::ty::Type;
use crate::type_set::TypeSet;

/// The type of an access to `bind` at `access`, given the bind's declared
/// type. Non-union types come back unchanged.
pub fn narrow(context: &Context, access: NodeId, bind: NodeId, declared: Type) -> Type {
    if !matches!(declared, Type::Union(..)) {
        return declared;
    }
    let guards = guards(context, access, bind);
    if guards.is_empty() {
        return declared;
    }
    let mut possible = TypeSet::from_type(&declared);
    for (condition, in_yes) in guards {
        possible = refine(context, condition, bind, in_yes, possible);
    }
    possible.fold()
}

/// Conditionals enclosing `access` (in a branch, not the condition) whose
/// condition type-tests `bind`, outermost first, each paired with whether
/// the access lies in the `yes` branch.
fn guards(context: &Context, access: NodeId, bind: NodeId) -> Vec<(NodeId, bool)> {
    let tree = context.tree();
    let mut found: Vec<(NodeId, bool)> = tree
        .ancestors(access)
        .filter_map(|ancestor| {
            let NodeKind::Conditional { condition, yes, no } = tree.kind(ancestor) else {
                return None;
            };
            let in_yes = tree.is_within(access, *yes);
            if !in_yes && !tree.is_within(access, *no) {
                return None;
            }
            tests_bind(context, *condition, bind).then_some((*condition, in_yes))
        })
        .collect();
    found.reverse();
    found
}

/// True if some `Is` inside `condition` tests `bind`.
fn tests_bind(context: &Context, condition: NodeId, bind: NodeId) -> bool {
    context.tree().descendants(condition).into_iter().any(|n| {
        matches!(context.tree().kind(n), NodeKind::Is { expression, .. }
            if context.binding_of(*expression) == Some(bind))
    })
}

/// Narrow `possible` by what `condition` being `truth` says about `bind`.
fn refine(
    context: &Context,
    condition: NodeId,
    bind: NodeId,
    truth: bool,
    possible: TypeSet,
) -> TypeSet {
    match context.tree().kind(condition) {
        NodeKind::Is {
            expression,
            annotation,
        } if context.binding_of(*expression) == Some(bind) => {
            let tested = TypeSet::from_type(&context.annotation_type(annotation, condition));
            if truth {
                possible.intersection(&tested)
            } else {
                possible.difference(&tested)
            }
        }
        NodeKind::UnaryOperation {
            operator: UnaryOperator::Not,
            operand,
        } => refine(context, *operand, bind, !truth, possible),
        // Both sides hold when `&` is true; both fail when `|` is false.
        NodeKind::BinaryOperation {
            left,
            operator: BinaryOperator::And,
            right,
        } if truth => {
            let possible = refine(context, *left, bind, true, possible);
            refine(context, *right, bind, true, possible)
        }
        NodeKind::BinaryOperation {
            left,
            operator: BinaryOperator::Or,
            right,
        } if !truth => {
            let possible = refine(context, *left, bind, false, possible);
            refine(context, *right, bind, false, possible)
        }
        _ => possible,
    }
}

//! Per-node conflict rules.
//!
//! Entry points: [`check`] for a whole tree, [`node_conflicts`] for one node
//! (what [`Context::conflicts_of`] caches). Each node's conflicts depend only
//! on the node itself and the read-only [`Context`], never on runtime values.

use quill_types::ast::{BinaryOperator, NodeKind, TypeAnnotation, UnaryOperator};
use quill_types::NodeId;

use crate::basis::Signature;
use crate::conflict::{Conflict, ConflictKind, Conflicts};
use crate::context::{Callee, Context};
use crate::env;
use crate::ty::Type;
use crate::type_set::TypeSet;

/// All conflicts in the context's tree.
pub fn check(context: &Context) -> Conflicts {
    context.conflicts()
}

/// The conflicts one node is responsible for.
pub fn node_conflicts(context: &Context, node: NodeId) -> Vec<Conflict> {
    let mut checker = NodeChecker {
        context,
        found: Vec::new(),
    };
    checker.check(node);
    checker.found
}

// ══════════════════════════════════════════════════════════════════════════════
// NodeChecker
// ══════════════════════════════════════════════════════════════════════════════

struct NodeChecker<'a> {
    context: &'a Context,
    found: Vec<Conflict>,
}

impl NodeChecker<'_> {
    fn report(&mut self, conflict: Conflict) {
        self.found.push(conflict);
    }

    fn check(&mut self, node: NodeId) {
        let tree = self.context.tree();
        match tree.kind(node) {
            NodeKind::Unparsable { .. } => self.report(Conflict::new(ConflictKind::Unparsable, node)),
            NodeKind::Block { statements } => self.check_block(node, statements),
            NodeKind::Bind {
                annotation, value, ..
            } => self.check_bind(node, annotation.as_ref(), *value),
            NodeKind::FunctionDefinition { inputs, output, .. } => {
                self.check_annotation(node, output.as_ref());
                self.check_inputs(inputs);
            }
            NodeKind::StructureDefinition { inputs, .. } => {
                self.check_inputs(inputs);
                self.check_interface(node, inputs);
            }
            NodeKind::ConversionDefinition { input, output, .. } => {
                self.check_annotation(node, Some(input));
                self.check_annotation(node, Some(output));
                self.check_conversion_placement(node);
            }
            NodeKind::Reference(_) => {
                if self.context.resolve(node).is_none() {
                    self.report(Conflict::new(ConflictKind::UnknownName, node));
                }
            }
            NodeKind::PropertyAccess { subject, name } => self.check_property(node, *subject, name),
            NodeKind::ListAccess { list, index } => {
                let list_type = self.context.value_type(*list);
                if !list_type.is_unknown() && !matches!(list_type, Type::List(_)) {
                    self.report(Conflict::new(ConflictKind::NotAList, *list).with_types(vec![list_type]));
                }
                self.expect_measurement(*index);
            }
            NodeKind::BinaryOperation {
                left,
                operator,
                right,
            } => self.check_binary(*left, *operator, *right),
            NodeKind::UnaryOperation { operator, operand } => match operator {
                UnaryOperator::Negate => self.expect_measurement(*operand),
                UnaryOperator::Not => self.expect_boolean(*operand, ConflictKind::IncompatibleOperand),
            },
            NodeKind::Conditional { condition, .. } => {
                self.expect_boolean(*condition, ConflictKind::ExpectedBooleanCondition)
            }
            NodeKind::Reaction { condition, .. } => {
                self.expect_boolean(*condition, ConflictKind::ExpectedBooleanCondition)
            }
            NodeKind::Is {
                expression,
                annotation,
            } => self.check_is(node, *expression, annotation),
            NodeKind::Evaluate { function, inputs } => self.check_evaluate(node, *function, inputs),
            NodeKind::Convert {
                expression,
                annotation,
            } => self.check_convert(node, *expression, annotation),
            NodeKind::Previous { stream, count } => {
                self.expect_stream(*stream);
                self.expect_measurement(*count);
            }
            NodeKind::Changed { stream } => self.expect_stream(*stream),
            NodeKind::Program { .. }
            | NodeKind::BooleanLiteral(_)
            | NodeKind::NumberLiteral { .. }
            | NodeKind::TextLiteral(_)
            | NodeKind::NoneLiteral
            | NodeKind::ListLiteral(_)
            | NodeKind::SetLiteral(_)
            | NodeKind::MapLiteral(_)
            | NodeKind::This => {}
        }
    }

    // ── Shape ────────────────────────────────────────────────────────────

    fn check_block(&mut self, block: NodeId, statements: &[NodeId]) {
        let tree = self.context.tree();
        self.check_duplicates(statements);

        if env::is_structure_body(tree, block) {
            return;
        }
        let ends_with_expression = statements
            .last()
            .is_some_and(|last| !tree.kind(*last).is_definition());
        if !ends_with_expression {
            self.report(Conflict::new(ConflictKind::ExpectedEndingExpression, block));
        }
    }

    fn check_duplicates(&mut self, declarations: &[NodeId]) {
        let tree = self.context.tree();
        for (i, later) in declarations.iter().enumerate() {
            let Some(name) = tree.kind(*later).defined_name() else {
                continue;
            };
            if let Some(earlier) = env::find_named(tree, &declarations[..i], name) {
                self.report(Conflict::new(ConflictKind::DuplicateName, *later).with_secondary(earlier));
            }
        }
    }

    fn check_inputs(&mut self, inputs: &[NodeId]) {
        self.check_duplicates(inputs);
        let mut seen_optional = false;
        for input in inputs {
            let has_default = matches!(
                self.context.tree().kind(*input),
                NodeKind::Bind { value: Some(_), .. }
            );
            if has_default {
                seen_optional = true;
            } else if seen_optional {
                self.report(Conflict::new(ConflictKind::RequiredAfterOptional, *input));
            }
        }
    }

    /// Structures with abstract functions are interfaces and cannot take inputs.
    fn check_interface(&mut self, structure: NodeId, inputs: &[NodeId]) {
        let tree = self.context.tree();
        let is_interface = env::structure_statements(tree, structure)
            .iter()
            .any(|s| matches!(tree.kind(*s), NodeKind::FunctionDefinition { body: None, .. }));
        if is_interface && !inputs.is_empty() {
            self.report(Conflict::new(ConflictKind::DisallowedInputs, structure));
        }
    }

    fn check_conversion_placement(&mut self, conversion: NodeId) {
        let tree = self.context.tree();
        let allowed = tree.parent(conversion).is_some_and(|block| {
            block == tree.program_block() || env::is_structure_body(tree, block)
        });
        if !allowed {
            self.report(Conflict::new(ConflictKind::MisplacedConversion, conversion));
        }
    }

    fn check_annotation(&mut self, node: NodeId, annotation: Option<&TypeAnnotation>) {
        if annotation.is_some_and(TypeAnnotation::is_unparsable) {
            self.report(Conflict::new(ConflictKind::Unparsable, node));
        }
    }

    // ── Binds and names ──────────────────────────────────────────────────

    fn check_bind(&mut self, bind: NodeId, annotation: Option<&TypeAnnotation>, value: Option<NodeId>) {
        self.check_annotation(bind, annotation);

        if let (Some(annotation), Some(value)) = (annotation, value) {
            let declared = self.context.annotation_type(annotation, bind);
            let given = self.context.type_of(value);
            if !declared.accepts(&given) && !declared.accepts(&self.context.value_type(value)) {
                self.report(
                    Conflict::new(ConflictKind::IncompatibleBind, bind).with_types(vec![declared, given]),
                );
            }
        }

        let tree = self.context.tree();
        let in_block = tree
            .parent(bind)
            .is_some_and(|p| matches!(tree.kind(p), NodeKind::Block { .. }) && !env::is_structure_body(tree, p));
        if in_block && self.context.references_to(bind).is_empty() {
            self.report(Conflict::new(ConflictKind::UnusedBind, bind));
        }
    }

    fn check_property(&mut self, access: NodeId, subject: NodeId, name: &str) {
        let known = match self.context.value_type(subject) {
            Type::Structure { .. } => self.context.member_of(access).is_some(),
            Type::Text => crate::basis::TextMethod::from_name(name).is_some(),
            Type::Unknown(_) => true,
            _ => false,
        };
        if !known {
            self.report(Conflict::new(ConflictKind::UnknownProperty, access));
        }
    }

    // ── Operations ───────────────────────────────────────────────────────

    fn check_binary(&mut self, left: NodeId, operator: BinaryOperator, right: NodeId) {
        use BinaryOperator::*;
        match operator {
            Equal | NotEqual => {}
            And | Or => {
                self.expect_boolean(left, ConflictKind::IncompatibleOperand);
                self.expect_boolean(right, ConflictKind::IncompatibleOperand);
            }
            Multiply | Divide => {
                self.expect_measurement(left);
                self.expect_measurement(right);
            }
            Add | Subtract | Remainder | Less | Greater | LessOrEqual | GreaterOrEqual => {
                self.expect_measurement(left);
                self.expect_measurement(right);
                let l = self.context.value_type(left);
                let r = self.context.value_type(right);
                if let (Some(a), Some(b)) = (l.unit(), r.unit()) {
                    if a != b {
                        self.report(Conflict::new(ConflictKind::IncompatibleOperand, right).with_types(vec![l, r]));
                    }
                }
            }
        }
    }

    fn check_is(&mut self, node: NodeId, expression: NodeId, annotation: &TypeAnnotation) {
        self.check_annotation(node, Some(annotation));
        let actual = self.context.value_type(expression);
        if actual.is_unknown() {
            return;
        }
        let tested = self.context.annotation_type(annotation, node);
        if tested.is_unknown() {
            return;
        }
        if TypeSet::from_type(&actual)
            .intersection(&TypeSet::from_type(&tested))
            .is_empty()
        {
            self.report(Conflict::new(ConflictKind::ImpossibleType, node).with_types(vec![tested, actual]));
        }
    }

    fn check_convert(&mut self, node: NodeId, expression: NodeId, annotation: &TypeAnnotation) {
        self.check_annotation(node, Some(annotation));
        let input = self.context.value_type(expression);
        let output = self.context.annotation_type(annotation, node);
        if input.is_unknown() || output.is_unknown() || output.accepts(&input) {
            return;
        }
        if self.context.conversion(&input, &output, node).is_none() {
            self.report(Conflict::new(ConflictKind::UnknownConversion, node).with_types(vec![input, output]));
        }
    }

    // ── Calls ────────────────────────────────────────────────────────────

    fn check_evaluate(&mut self, node: NodeId, function: NodeId, inputs: &[NodeId]) {
        match self.context.callee(node) {
            Some(Callee::Function(def)) | Some(Callee::Structure(def)) => {
                let declared: Vec<(Type, bool, Option<NodeId>)> = self
                    .context
                    .inputs_of(def)
                    .iter()
                    .map(|input| {
                        let optional = matches!(
                            self.context.tree().kind(*input),
                            NodeKind::Bind { value: Some(_), .. }
                        );
                        (self.context.declared_type(*input), optional, Some(*input))
                    })
                    .collect();
                self.check_arguments(node, inputs, &declared);
            }
            Some(Callee::Stream(kind)) => self.check_signature(node, inputs, &kind.signature()),
            Some(Callee::Text(method)) => self.check_signature(node, inputs, &method.signature()),
            None => match self.context.type_of(function) {
                Type::Function(params, _) => {
                    let declared: Vec<_> = params.into_iter().map(|t| (t, false, None)).collect();
                    self.check_arguments(node, inputs, &declared);
                }
                Type::Unknown(_) => {}
                other => self.report(Conflict::new(ConflictKind::NotAFunction, function).with_types(vec![other])),
            },
        }
    }

    fn check_signature(&mut self, node: NodeId, inputs: &[NodeId], signature: &Signature) {
        let declared: Vec<_> = signature
            .inputs
            .iter()
            .map(|i| (i.ty.clone(), i.optional, None))
            .collect();
        self.check_arguments(node, inputs, &declared);
    }

    /// Match arguments to declared inputs `(type, optional, declaration)`.
    fn check_arguments(
        &mut self,
        evaluate: NodeId,
        arguments: &[NodeId],
        declared: &[(Type, bool, Option<NodeId>)],
    ) {
        for (i, (expected, optional, declaration)) in declared.iter().enumerate() {
            match arguments.get(i) {
                Some(argument) => {
                    let given = self.context.value_type(*argument);
                    if !expected.accepts(&given) {
                        let mut conflict = Conflict::new(ConflictKind::IncompatibleInput, *argument);
                        if let Some(declaration) = declaration {
                            conflict = conflict.with_secondary(*declaration);
                        }
                        self.report(conflict.with_types(vec![expected.clone(), given]));
                    }
                }
                None if !optional => {
                    let mut conflict = Conflict::new(ConflictKind::MissingInput, evaluate);
                    if let Some(declaration) = declaration {
                        conflict = conflict.with_secondary(*declaration);
                    }
                    self.report(conflict.with_types(vec![expected.clone()]));
                }
                None => {}
            }
        }
        if let Some(extra) = arguments.get(declared.len()) {
            self.report(Conflict::new(ConflictKind::TooManyInputs, *extra));
        }
    }

    // ── Expectations ─────────────────────────────────────────────────────

    fn expect_measurement(&mut self, node: NodeId) {
        let ty = self.context.value_type(node);
        if !ty.is_measurement() {
            self.report(
                Conflict::new(ConflictKind::IncompatibleOperand, node)
                    .with_types(vec![Type::Measurement(None), ty]),
            );
        }
    }

    fn expect_boolean(&mut self, node: NodeId, kind: ConflictKind) {
        let ty = self.context.value_type(node);
        if !ty.is_boolean() {
            self.report(Conflict::new(kind, node).with_types(vec![Type::Boolean, ty]));
        }
    }

    fn expect_stream(&mut self, node: NodeId) {
        let ty = self.context.type_of(node);
        if !ty.is_unknown() && !matches!(ty, Type::Stream(_)) {
            self.report(Conflict::new(ConflictKind::NotAStream, node).with_types(vec![ty]));
        }
    }
}

//! Read-only analysis context over one syntax tree.
//!
//! [`Context`] answers every static question the checker and the evaluator
//! ask: the type of a node, what a name refers to, which conversion applies,
//! which streams an expression depends on. Answers are computed lazily and
//! cached per node. A context belongs to exactly one tree; an edited tree gets
//! a fresh context, which is how caches are invalidated.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use quill_types::ast::{BinaryOperator, NodeKind, TypeAnnotation, UnaryOperator};
use quill_types::{NodeId, Tree};
use tracing::debug;

use crate::basis::{NativeConversion, StreamKind, TextMethod};
use crate::checker;
use crate::conflict::{Conflict, Conflicts};
use crate::env::{self, Definition, ScopeKind};
use crate::narrowing;
use crate::ty::{Type, UnknownReason};

// ══════════════════════════════════════════════════════════════════════════════
// Query results
// ══════════════════════════════════════════════════════════════════════════════

/// What an `Evaluate` node calls, when that is statically known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    Function(NodeId),
    Structure(NodeId),
    Stream(StreamKind),
    Text(TextMethod),
}

/// A conversion implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// A `ConversionDefinition` node.
    Defined(NodeId),
    Native(NativeConversion),
}

/// A conversion found for an input/output pair, with the type it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionMatch {
    pub conversion: Conversion,
    pub output: Type,
}

// ══════════════════════════════════════════════════════════════════════════════
// Context
// ══════════════════════════════════════════════════════════════════════════════

pub struct Context {
    tree: Rc<Tree>,
    types: RefCell<HashMap<NodeId, Type>>,
    /// Nodes whose type is being computed, for cycle detection.
    visiting: RefCell<HashSet<NodeId>>,
    /// Bumped every time a cycle is cut. Types computed while it changed are
    /// provisional and not cached.
    cycles: Cell<usize>,
    resolutions: RefCell<HashMap<NodeId, Option<Definition>>>,
    /// Definition node → references that resolve to it.
    references: OnceCell<HashMap<NodeId, Vec<NodeId>>>,
    dependencies: RefCell<HashMap<NodeId, BTreeSet<NodeId>>>,
    conflicts: RefCell<HashMap<NodeId, Vec<Conflict>>>,
}

impl Context {
    pub fn new(tree: Rc<Tree>) -> Self {
        Self {
            tree,
            types: RefCell::new(HashMap::new()),
            visiting: RefCell::new(HashSet::new()),
            cycles: Cell::new(0),
            resolutions: RefCell::new(HashMap::new()),
            references: OnceCell::new(),
            dependencies: RefCell::new(HashMap::new()),
            conflicts: RefCell::new(HashMap::new()),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn shared_tree(&self) -> Rc<Tree> {
        Rc::clone(&self.tree)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Types
    // ══════════════════════════════════════════════════════════════════════

    /// The static type of `node`. Self-dependent types come back as
    /// `Unknown(Cycle)`.
    pub fn type_of(&self, node: NodeId) -> Type {
        let cached = self.types.borrow().get(&node).cloned();
        if let Some(ty) = cached {
            return ty;
        }
        if !self.visiting.borrow_mut().insert(node) {
            self.cycles.set(self.cycles.get() + 1);
            return Type::Unknown(UnknownReason::Cycle);
        }
        let before = self.cycles.get();
        let ty = self.compute_type(node);
        self.visiting.borrow_mut().remove(&node);
        if self.cycles.get() == before {
            self.types.borrow_mut().insert(node, ty.clone());
        }
        ty
    }

    /// The type a bind declares: its annotation, else its value's type.
    pub fn declared_type(&self, bind: NodeId) -> Type {
        match self.tree.kind(bind) {
            NodeKind::Bind {
                annotation: Some(annotation),
                ..
            } => self.annotation_type(annotation, bind),
            NodeKind::Bind {
                value: Some(value), ..
            } => self.type_of(*value),
            NodeKind::Bind { .. } => Type::Unknown(UnknownReason::Unannotated),
            _ => self.type_of(bind),
        }
    }

    /// Resolve a written type relative to the node that carries it.
    pub fn annotation_type(&self, annotation: &TypeAnnotation, at: NodeId) -> Type {
        match annotation {
            TypeAnnotation::Boolean => Type::Boolean,
            TypeAnnotation::Text => Type::Text,
            TypeAnnotation::Number(unit) => Type::Measurement(unit.clone()),
            TypeAnnotation::None => Type::None,
            TypeAnnotation::List(item) => Type::list(self.annotation_type(item, at)),
            TypeAnnotation::Set(item) => Type::set(self.annotation_type(item, at)),
            TypeAnnotation::Map(key, value) => Type::map(
                self.annotation_type(key, at),
                self.annotation_type(value, at),
            ),
            TypeAnnotation::Stream(item) => Type::stream(self.annotation_type(item, at)),
            TypeAnnotation::Union(left, right) => Type::union(
                self.annotation_type(left, at),
                self.annotation_type(right, at),
            ),
            TypeAnnotation::Named(name) => match env::resolve_name(&self.tree, name, at) {
                Some(Definition::Structure(definition)) => self.structure_type(definition),
                _ => Type::Unknown(UnknownReason::Unresolved),
            },
            TypeAnnotation::Function { inputs, output } => Type::function(
                inputs.iter().map(|i| self.annotation_type(i, at)).collect(),
                self.annotation_type(output, at),
            ),
            TypeAnnotation::Unparsable => Type::Unknown(UnknownReason::Unparsable),
        }
    }

    /// The type of instances of a structure definition.
    pub fn structure_type(&self, definition: NodeId) -> Type {
        let name = self
            .tree
            .kind(definition)
            .defined_name()
            .unwrap_or_default()
            .to_string();
        Type::Structure { definition, name }
    }

    fn compute_type(&self, node: NodeId) -> Type {
        let tree = &*self.tree;
        match tree.kind(node) {
            NodeKind::Program { block } => self.type_of(*block),
            NodeKind::Block { statements } => match statements.last() {
                Some(last) if !tree.kind(*last).is_definition() => self.value_type(*last),
                _ => Type::Never,
            },
            NodeKind::Bind { .. } => self.declared_type(node),
            NodeKind::FunctionDefinition {
                inputs,
                output,
                body,
                ..
            } => {
                let output = match (output, body) {
                    (Some(annotation), _) => self.annotation_type(annotation, node),
                    (None, Some(body)) => self.type_of(*body),
                    (None, None) => Type::Unknown(UnknownReason::Unannotated),
                };
                Type::function(self.input_types(inputs), output)
            }
            NodeKind::StructureDefinition { inputs, .. } => {
                Type::function(self.input_types(inputs), self.structure_type(node))
            }
            NodeKind::ConversionDefinition { input, output, .. } => Type::function(
                vec![self.annotation_type(input, node)],
                self.annotation_type(output, node),
            ),
            NodeKind::BooleanLiteral(_) => Type::Boolean,
            NodeKind::NumberLiteral { unit, .. } => Type::measurement(unit.clone()),
            NodeKind::TextLiteral(_) => Type::Text,
            NodeKind::NoneLiteral => Type::None,
            NodeKind::ListLiteral(items) => Type::list(self.item_type(items.iter().copied())),
            NodeKind::SetLiteral(items) => Type::set(self.item_type(items.iter().copied())),
            NodeKind::MapLiteral(pairs) => Type::map(
                self.item_type(pairs.iter().map(|(k, _)| *k)),
                self.item_type(pairs.iter().map(|(_, v)| *v)),
            ),
            NodeKind::Reference(_) => match self.resolve(node) {
                Some(Definition::Bind(bind)) => {
                    narrowing::narrow(self, node, bind, self.declared_type(bind))
                }
                Some(Definition::Function(def)) | Some(Definition::Structure(def)) => {
                    self.type_of(def)
                }
                Some(Definition::Stream(kind)) => kind.signature().function_type(),
                None => Type::Unknown(UnknownReason::Unresolved),
            },
            NodeKind::PropertyAccess { subject, name } => self.property_type(node, *subject, name),
            NodeKind::ListAccess { list, .. } => match self.value_type(*list) {
                Type::List(item) => Type::union_of([*item, Type::None]).unwrap_or(Type::None),
                Type::Unknown(reason) => Type::Unknown(reason),
                _ => Type::Unknown(UnknownReason::Unsupported),
            },
            NodeKind::This => self.this_type(node),
            NodeKind::BinaryOperation {
                left,
                operator,
                right,
            } => self.binary_type(*left, *operator, *right),
            NodeKind::UnaryOperation { operator, operand } => match operator {
                UnaryOperator::Not => Type::Boolean,
                UnaryOperator::Negate => {
                    let ty = self.value_type(*operand);
                    if ty.is_measurement() {
                        ty
                    } else {
                        Type::Unknown(UnknownReason::Unsupported)
                    }
                }
            },
            NodeKind::Conditional { yes, no, .. } => {
                Type::union_of([self.value_type(*yes), self.value_type(*no)]).unwrap_or(Type::Never)
            }
            NodeKind::Is { .. } | NodeKind::Changed { .. } => Type::Boolean,
            NodeKind::Evaluate { function, .. } => match self.type_of(*function) {
                Type::Function(_, output) => *output,
                Type::Unknown(reason) => Type::Unknown(reason),
                _ => Type::Unknown(UnknownReason::Unsupported),
            },
            NodeKind::Convert {
                expression,
                annotation,
            } => {
                let input = self.value_type(*expression);
                let target = self.annotation_type(annotation, node);
                if target.accepts(&input) {
                    target
                } else {
                    self.conversion(&input, &target, node)
                        .map(|m| m.output)
                        .unwrap_or(Type::Unknown(UnknownReason::Unsupported))
                }
            }
            NodeKind::Previous { stream, .. } => match self.type_of(*stream) {
                Type::Stream(item) => *item,
                Type::Unknown(reason) => Type::Unknown(reason),
                _ => Type::Unknown(UnknownReason::Unsupported),
            },
            NodeKind::Reaction { initial, next, .. } => {
                Type::union_of([self.value_type(*initial), self.value_type(*next)])
                    .unwrap_or(Type::Never)
            }
            NodeKind::Unparsable { .. } => Type::Unknown(UnknownReason::Unparsable),
        }
    }

    fn input_types(&self, inputs: &[NodeId]) -> Vec<Type> {
        inputs.iter().map(|i| self.declared_type(*i)).collect()
    }

    fn item_type(&self, items: impl Iterator<Item = NodeId>) -> Type {
        Type::union_of(items.map(|i| self.value_type(i))).unwrap_or(Type::Never)
    }

    fn property_type(&self, access: NodeId, subject: NodeId, name: &str) -> Type {
        match self.value_type(subject) {
            Type::Structure { definition, .. } => {
                match env::structure_member(&self.tree, definition, name) {
                    Some(member) if matches!(self.tree.kind(member), NodeKind::Bind { .. }) => {
                        narrowing::narrow(self, access, member, self.declared_type(member))
                    }
                    Some(member) => self.type_of(member),
                    None => Type::Unknown(UnknownReason::Unresolved),
                }
            }
            Type::Text => match TextMethod::from_name(name) {
                Some(method) => method.signature().function_type(),
                None => Type::Unknown(UnknownReason::Unresolved),
            },
            Type::Unknown(reason) => Type::Unknown(reason),
            _ => Type::Unknown(UnknownReason::Unresolved),
        }
    }

    /// The type of the value an expression yields when it is used as an
    /// operand: a stream is seen through to the values it carries.
    pub fn value_type(&self, node: NodeId) -> Type {
        match self.type_of(node) {
            Type::Stream(item) => *item,
            other => other,
        }
    }

    fn this_type(&self, node: NodeId) -> Type {
        for ancestor in self.tree.ancestors(node) {
            match self.tree.kind(ancestor) {
                NodeKind::ConversionDefinition { input, .. } => {
                    return self.annotation_type(input, ancestor)
                }
                NodeKind::StructureDefinition { .. } => return self.structure_type(ancestor),
                _ => {}
            }
        }
        Type::Unknown(UnknownReason::Unresolved)
    }

    fn binary_type(&self, left: NodeId, operator: BinaryOperator, right: NodeId) -> Type {
        use BinaryOperator::*;
        let l = self.value_type(left);
        let r = self.value_type(right);
        match operator {
            Add | Subtract | Remainder => match (&l, &r) {
                (Type::Measurement(unit), _) => Type::Measurement(unit.clone()),
                (Type::Unknown(_), Type::Measurement(unit)) => Type::Measurement(unit.clone()),
                (Type::Unknown(reason), _) => Type::Unknown(*reason),
                _ => Type::Unknown(UnknownReason::Unsupported),
            },
            Multiply | Divide => match (&l, &r) {
                (Type::Measurement(Some(a)), Type::Measurement(Some(b))) => {
                    Type::measurement(if operator == Multiply {
                        a.product(b)
                    } else {
                        a.quotient(b)
                    })
                }
                (Type::Measurement(_), Type::Measurement(_)) => Type::Measurement(None),
                (Type::Unknown(reason), _) | (_, Type::Unknown(reason)) => Type::Unknown(*reason),
                _ => Type::Unknown(UnknownReason::Unsupported),
            },
            Less | Greater | LessOrEqual | GreaterOrEqual | Equal | NotEqual | And | Or => {
                Type::Boolean
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Names
    // ══════════════════════════════════════════════════════════════════════

    /// What a `Reference` node refers to.
    pub fn resolve(&self, reference: NodeId) -> Option<Definition> {
        let cached = self.resolutions.borrow().get(&reference).copied();
        if let Some(found) = cached {
            return found;
        }
        let found = match self.tree.kind(reference) {
            NodeKind::Reference(name) => env::resolve_name(&self.tree, name, reference),
            _ => None,
        };
        self.resolutions.borrow_mut().insert(reference, found);
        found
    }

    /// The structure member a `PropertyAccess` node reads, if the subject is
    /// a structure.
    pub fn member_of(&self, access: NodeId) -> Option<NodeId> {
        let NodeKind::PropertyAccess { subject, name } = self.tree.kind(access) else {
            return None;
        };
        match self.value_type(*subject) {
            Type::Structure { definition, .. } => {
                env::structure_member(&self.tree, definition, name)
            }
            _ => None,
        }
    }

    /// The `Bind` an expression reads directly, through a name or a
    /// structure property.
    pub fn binding_of(&self, expression: NodeId) -> Option<NodeId> {
        match self.tree.kind(expression) {
            NodeKind::Reference(_) => match self.resolve(expression)? {
                Definition::Bind(bind) => Some(bind),
                _ => None,
            },
            NodeKind::PropertyAccess { .. } => self
                .member_of(expression)
                .filter(|m| matches!(self.tree.kind(*m), NodeKind::Bind { .. })),
            _ => None,
        }
    }

    /// Every `Reference` that resolves to the definition node `definition`.
    pub fn references_to(&self, definition: NodeId) -> &[NodeId] {
        let index = self.references.get_or_init(|| {
            let mut index: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
            for node in self.tree.nodes() {
                let target = match self.tree.kind(node) {
                    NodeKind::Reference(_) => self.resolve(node).and_then(Definition::node),
                    NodeKind::PropertyAccess { .. } => self.member_of(node),
                    _ => None,
                };
                if let Some(target) = target {
                    index.entry(target).or_default().push(node);
                }
            }
            index
        });
        index.get(&definition).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The input binds of a function or structure definition.
    pub fn inputs_of(&self, definition: NodeId) -> &[NodeId] {
        match self.tree.kind(definition) {
            NodeKind::FunctionDefinition { inputs, .. }
            | NodeKind::StructureDefinition { inputs, .. } => inputs,
            _ => &[],
        }
    }

    /// What an `Evaluate` node calls, if statically known.
    pub fn callee(&self, evaluate: NodeId) -> Option<Callee> {
        let NodeKind::Evaluate { function, .. } = self.tree.kind(evaluate) else {
            return None;
        };
        match self.tree.kind(*function) {
            NodeKind::Reference(_) => match self.resolve(*function)? {
                Definition::Function(def) => Some(Callee::Function(def)),
                Definition::Structure(def) => Some(Callee::Structure(def)),
                Definition::Stream(kind) => Some(Callee::Stream(kind)),
                Definition::Bind(_) => None,
            },
            NodeKind::PropertyAccess { subject, name } => {
                if let Some(member) = self.member_of(*function) {
                    return match self.tree.kind(member) {
                        NodeKind::FunctionDefinition { .. } => Some(Callee::Function(member)),
                        NodeKind::StructureDefinition { .. } => Some(Callee::Structure(member)),
                        _ => None,
                    };
                }
                match self.value_type(*subject) {
                    Type::Text => TextMethod::from_name(name).map(Callee::Text),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Conversions
    // ══════════════════════════════════════════════════════════════════════

    /// Find a conversion from `input` to `output` visible at `at`.
    ///
    /// Looks at conversions declared on structure members of `input`, then
    /// conversions in blocks enclosing `at`, then the basis, trying each
    /// member of a union input in turn.
    pub fn conversion(&self, input: &Type, output: &Type, at: NodeId) -> Option<ConversionMatch> {
        if input.is_unknown() || output.is_unknown() {
            return None;
        }
        let members = input.members();

        for member in &members {
            if let Type::Structure { definition, .. } = member {
                let statements = env::structure_statements(&self.tree, *definition);
                if let Some(found) = self.defined_conversion(statements, member, output) {
                    return Some(found);
                }
            }
        }

        for ancestor in self.tree.ancestors(at) {
            if let NodeKind::Block { statements } = self.tree.kind(ancestor) {
                for member in &members {
                    if let Some(found) = self.defined_conversion(statements, member, output) {
                        return Some(found);
                    }
                }
            }
        }

        members.iter().find_map(|member| {
            NativeConversion::find(member, output).map(|native| ConversionMatch {
                conversion: Conversion::Native(native),
                output: native.output_type(member),
            })
        })
    }

    fn defined_conversion(
        &self,
        statements: &[NodeId],
        input: &Type,
        output: &Type,
    ) -> Option<ConversionMatch> {
        statements.iter().find_map(|statement| {
            let NodeKind::ConversionDefinition {
                input: from,
                output: to,
                ..
            } = self.tree.kind(*statement)
            else {
                return None;
            };
            let from = self.annotation_type(from, *statement);
            let to = self.annotation_type(to, *statement);
            (from.accepts(input) && output.accepts(&to)).then(|| ConversionMatch {
                conversion: Conversion::Defined(*statement),
                output: to,
            })
        })
    }

    // ══════════════════════════════════════════════════════════════════════
    // Stream dependencies
    // ══════════════════════════════════════════════════════════════════════

    /// The stream-creating `Evaluate` nodes, reactions and `∆` tests whose
    /// values `node` may read, following names into the binds and functions
    /// they refer to.
    pub fn stream_dependencies(&self, node: NodeId) -> BTreeSet<NodeId> {
        let cached = self.dependencies.borrow().get(&node).cloned();
        if let Some(deps) = cached {
            return deps;
        }
        let mut visited = HashSet::new();
        let mut deps = BTreeSet::new();
        self.collect_dependencies(node, &mut visited, &mut deps);
        self.dependencies.borrow_mut().insert(node, deps.clone());
        deps
    }

    fn collect_dependencies(
        &self,
        node: NodeId,
        visited: &mut HashSet<NodeId>,
        deps: &mut BTreeSet<NodeId>,
    ) {
        for n in self.tree.descendants(node) {
            let follow = match self.tree.kind(n) {
                NodeKind::Evaluate { .. } => match self.callee(n) {
                    Some(Callee::Stream(_)) => {
                        deps.insert(n);
                        None
                    }
                    Some(Callee::Function(def)) | Some(Callee::Structure(def)) => Some(def),
                    _ => None,
                },
                NodeKind::Reaction { .. } | NodeKind::Changed { .. } => {
                    deps.insert(n);
                    None
                }
                NodeKind::Reference(_) => self.resolve(n).and_then(Definition::node),
                NodeKind::PropertyAccess { .. } => self.member_of(n),
                NodeKind::Convert { .. } => self.convert_target(n),
                _ => None,
            };
            if let Some(target) = follow {
                if visited.insert(target) {
                    self.collect_dependencies(target, visited, deps);
                }
            }
        }
    }

    fn convert_target(&self, convert: NodeId) -> Option<NodeId> {
        let NodeKind::Convert {
            expression,
            annotation,
        } = self.tree.kind(convert)
        else {
            return None;
        };
        let input = self.value_type(*expression);
        let output = self.annotation_type(annotation, convert);
        match self.conversion(&input, &output, convert)?.conversion {
            Conversion::Defined(def) => Some(def),
            Conversion::Native(_) => None,
        }
    }

    /// True if a value computed for `node` on one reaction pass may be reused
    /// on a later pass whose changed streams are disjoint from
    /// [`stream_dependencies`](Self::stream_dependencies).
    ///
    /// Only program-level expressions qualify. Definitions must run to bind
    /// their names; `∆` and reactions read which stream caused the pass.
    pub fn is_memoizable(&self, node: NodeId) -> bool {
        let tree = &*self.tree;
        let kind = tree.kind(node);
        if kind.is_definition()
            || matches!(kind, NodeKind::Program { .. })
            || node == tree.program_block()
        {
            return false;
        }
        if env::enclosing_scope(tree, node) != ScopeKind::Program {
            return false;
        }
        !tree.descendants(node).into_iter().any(|n| {
            matches!(
                tree.kind(n),
                NodeKind::Changed { .. } | NodeKind::Reaction { .. } | NodeKind::Bind { .. }
            )
        })
    }

    // ══════════════════════════════════════════════════════════════════════
    // Conflicts
    // ══════════════════════════════════════════════════════════════════════

    /// Conflicts on a single node, computed once.
    pub fn conflicts_of(&self, node: NodeId) -> Vec<Conflict> {
        let cached = self.conflicts.borrow().get(&node).cloned();
        if let Some(found) = cached {
            return found;
        }
        let found = checker::node_conflicts(self, node);
        self.conflicts.borrow_mut().insert(node, found.clone());
        found
    }

    /// Every conflict in the tree, in pre-order.
    pub fn conflicts(&self) -> Conflicts {
        let mut batch = Conflicts::new();
        for node in self.tree.nodes() {
            batch.extend(self.conflicts_of(node));
        }
        debug!(
            total = batch.len(),
            fatal = batch.fatal().count(),
            "computed conflicts"
        );
        batch
    }
}

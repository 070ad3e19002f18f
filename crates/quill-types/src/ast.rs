//! Arena-indexed syntax tree.
//!
//! Nodes live in a flat arena and refer to their children by [`NodeId`].
//! Parent links are not stored in the nodes; [`Tree`] keeps a separate parent
//! table computed once in [`TreeBuilder::finish`], so upward walks (scope
//! resolution, narrowing guards) never create ownership cycles.
//!
//! A finished tree is immutable. Edits go through [`Tree::edit`] or
//! [`Tree::with_replacement`], which produce a new tree; nodes that are no
//! longer reachable from the root stay in the arena but have no parent and are
//! never visited.

use crate::{Span, TreeError, Unit};
use serde::{Deserialize, Serialize};
use std::fmt;

// ══════════════════════════════════════════════════════════════════════════════
// Node identity
// ══════════════════════════════════════════════════════════════════════════════

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Operators
// ══════════════════════════════════════════════════════════════════════════════

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "×",
            Self::Divide => "÷",
            Self::Remainder => "%",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessOrEqual => "≤",
            Self::GreaterOrEqual => "≥",
            Self::Equal => "=",
            Self::NotEqual => "≠",
            Self::And => "&",
            Self::Or => "|",
        }
    }

    /// `=` and `≠` are defined on every kind of value.
    pub fn is_equality(self) -> bool {
        matches!(self, Self::Equal | Self::NotEqual)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Less | Self::Greater | Self::LessOrEqual | Self::GreaterOrEqual
        )
    }
}

/// Prefix operators: `-` on measurements, `~` on booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Negate,
    Not,
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Negate => "-",
            Self::Not => "~",
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Type Annotations
// ══════════════════════════════════════════════════════════════════════════════

/// A type as written in source. Names are resolved by the analyzer relative to
/// the node that carries the annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeAnnotation {
    /// `?`
    Boolean,
    /// `''`
    Text,
    /// `#` (any unit) or `#ms`
    Number(Option<Unit>),
    /// `ø`
    None,
    /// `[T]`
    List(Box<TypeAnnotation>),
    /// `{T}`
    Set(Box<TypeAnnotation>),
    /// `{K:V}`
    Map(Box<TypeAnnotation>, Box<TypeAnnotation>),
    /// `…T`
    Stream(Box<TypeAnnotation>),
    /// `A | B`
    Union(Box<TypeAnnotation>, Box<TypeAnnotation>),
    /// A structure name.
    Named(String),
    /// `ƒ (A B) R`
    Function {
        inputs: Vec<TypeAnnotation>,
        output: Box<TypeAnnotation>,
    },
    /// A type the parser could not make sense of.
    Unparsable,
}

impl TypeAnnotation {
    pub fn number() -> Self {
        Self::Number(None)
    }

    pub fn measurement(unit: Unit) -> Self {
        Self::Number(Some(unit))
    }

    pub fn list(item: TypeAnnotation) -> Self {
        Self::List(Box::new(item))
    }

    pub fn set(item: TypeAnnotation) -> Self {
        Self::Set(Box::new(item))
    }

    pub fn stream(item: TypeAnnotation) -> Self {
        Self::Stream(Box::new(item))
    }

    pub fn union(left: TypeAnnotation, right: TypeAnnotation) -> Self {
        Self::Union(Box::new(left), Box::new(right))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// True if this annotation or any part of it failed to parse.
    pub fn is_unparsable(&self) -> bool {
        match self {
            Self::Unparsable => true,
            Self::List(t) | Self::Set(t) | Self::Stream(t) => t.is_unparsable(),
            Self::Map(a, b) | Self::Union(a, b) => a.is_unparsable() || b.is_unparsable(),
            Self::Function { inputs, output } => {
                inputs.iter().any(TypeAnnotation::is_unparsable) || output.is_unparsable()
            }
            Self::Boolean | Self::Text | Self::Number(_) | Self::None | Self::Named(_) => false,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Nodes
// ══════════════════════════════════════════════════════════════════════════════

/// The syntactic shape of a node. Children are referenced by id.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The root. Its block is the program's top-level scope.
    Program { block: NodeId },
    /// A sequence of statements; its value is the last statement's.
    Block { statements: Vec<NodeId> },
    /// `name•Type: value`. Inputs of functions and structures are binds
    /// whose value, if present, is the default.
    Bind {
        name: String,
        annotation: Option<TypeAnnotation>,
        value: Option<NodeId>,
    },
    /// `ƒ name(inputs) •Output body`. A missing body declares an abstract
    /// function.
    FunctionDefinition {
        name: String,
        inputs: Vec<NodeId>,
        output: Option<TypeAnnotation>,
        body: Option<NodeId>,
    },
    /// `•Name(inputs) ( members )`. The body block holds member binds,
    /// functions and conversions.
    StructureDefinition {
        name: String,
        inputs: Vec<NodeId>,
        body: Option<NodeId>,
    },
    /// `→ Input Output body`. The body refers to the converted value as `This`.
    ConversionDefinition {
        input: TypeAnnotation,
        output: TypeAnnotation,
        body: NodeId,
    },
    BooleanLiteral(bool),
    NumberLiteral { value: f64, unit: Unit },
    TextLiteral(String),
    NoneLiteral,
    ListLiteral(Vec<NodeId>),
    SetLiteral(Vec<NodeId>),
    MapLiteral(Vec<(NodeId, NodeId)>),
    /// A bare name.
    Reference(String),
    /// `subject.name`
    PropertyAccess { subject: NodeId, name: String },
    /// `list[index]`, 1-based.
    ListAccess { list: NodeId, index: NodeId },
    /// The value a conversion or structure member is operating on.
    This,
    BinaryOperation {
        left: NodeId,
        operator: BinaryOperator,
        right: NodeId,
    },
    UnaryOperation {
        operator: UnaryOperator,
        operand: NodeId,
    },
    /// `condition ? yes no`
    Conditional {
        condition: NodeId,
        yes: NodeId,
        no: NodeId,
    },
    /// `expression•Type`, a runtime type test.
    Is {
        expression: NodeId,
        annotation: TypeAnnotation,
    },
    /// `function(inputs)`
    Evaluate { function: NodeId, inputs: Vec<NodeId> },
    /// `expression → Type`
    Convert {
        expression: NodeId,
        annotation: TypeAnnotation,
    },
    /// `← count stream`: the stream's value `count` appends ago.
    Previous { stream: NodeId, count: NodeId },
    /// `∆ stream`: true when the stream caused the current reaction.
    Changed { stream: NodeId },
    /// `initial … condition … next`
    Reaction {
        initial: NodeId,
        condition: NodeId,
        next: NodeId,
    },
    /// Source the parser could not make sense of.
    Unparsable { text: String },
}

impl NodeKind {
    /// Children in source (and evaluation) order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Self::Program { block } => vec![*block],
            Self::Block { statements } => statements.clone(),
            Self::Bind { value, .. } => value.iter().copied().collect(),
            Self::FunctionDefinition { inputs, body, .. } => {
                inputs.iter().copied().chain(body.iter().copied()).collect()
            }
            Self::StructureDefinition { inputs, body, .. } => {
                inputs.iter().copied().chain(body.iter().copied()).collect()
            }
            Self::ConversionDefinition { body, .. } => vec![*body],
            Self::ListLiteral(items) | Self::SetLiteral(items) => items.clone(),
            Self::MapLiteral(pairs) => pairs.iter().flat_map(|(k, v)| [*k, *v]).collect(),
            Self::PropertyAccess { subject, .. } => vec![*subject],
            Self::ListAccess { list, index } => vec![*list, *index],
            Self::BinaryOperation { left, right, .. } => vec![*left, *right],
            Self::UnaryOperation { operand, .. } => vec![*operand],
            Self::Conditional { condition, yes, no } => vec![*condition, *yes, *no],
            Self::Is { expression, .. } | Self::Convert { expression, .. } => vec![*expression],
            Self::Evaluate { function, inputs } => {
                std::iter::once(*function).chain(inputs.iter().copied()).collect()
            }
            Self::Previous { stream, count } => vec![*stream, *count],
            Self::Changed { stream } => vec![*stream],
            Self::Reaction {
                initial,
                condition,
                next,
            } => vec![*initial, *condition, *next],
            Self::BooleanLiteral(_)
            | Self::NumberLiteral { .. }
            | Self::TextLiteral(_)
            | Self::NoneLiteral
            | Self::Reference(_)
            | Self::This
            | Self::Unparsable { .. } => Vec::new(),
        }
    }

    /// The name this node introduces into its enclosing scope, if any.
    pub fn defined_name(&self) -> Option<&str> {
        match self {
            Self::Bind { name, .. }
            | Self::FunctionDefinition { name, .. }
            | Self::StructureDefinition { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Binds and definitions change the scope they are evaluated in.
    pub fn is_definition(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. }
                | Self::FunctionDefinition { .. }
                | Self::StructureDefinition { .. }
                | Self::ConversionDefinition { .. }
        )
    }

    /// Stable name of the node kind, used as the key for localized
    /// descriptions.
    pub fn descriptor(&self) -> &'static str {
        match self {
            Self::Program { .. } => "Program",
            Self::Block { .. } => "Block",
            Self::Bind { .. } => "Bind",
            Self::FunctionDefinition { .. } => "FunctionDefinition",
            Self::StructureDefinition { .. } => "StructureDefinition",
            Self::ConversionDefinition { .. } => "ConversionDefinition",
            Self::BooleanLiteral(_) => "BooleanLiteral",
            Self::NumberLiteral { .. } => "NumberLiteral",
            Self::TextLiteral(_) => "TextLiteral",
            Self::NoneLiteral => "NoneLiteral",
            Self::ListLiteral(_) => "ListLiteral",
            Self::SetLiteral(_) => "SetLiteral",
            Self::MapLiteral(_) => "MapLiteral",
            Self::Reference(_) => "Reference",
            Self::PropertyAccess { .. } => "PropertyAccess",
            Self::ListAccess { .. } => "ListAccess",
            Self::This => "This",
            Self::BinaryOperation { .. } => "BinaryOperation",
            Self::UnaryOperation { .. } => "UnaryOperation",
            Self::Conditional { .. } => "Conditional",
            Self::Is { .. } => "Is",
            Self::Evaluate { .. } => "Evaluate",
            Self::Convert { .. } => "Convert",
            Self::Previous { .. } => "Previous",
            Self::Changed { .. } => "Changed",
            Self::Reaction { .. } => "Reaction",
            Self::Unparsable { .. } => "Unparsable",
        }
    }
}

/// A node in the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

// ══════════════════════════════════════════════════════════════════════════════
// Tree
// ══════════════════════════════════════════════════════════════════════════════

/// An immutable syntax tree with a parent lookup table.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    parents: Vec<Option<NodeId>>,
    root: NodeId,
}

impl Tree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The program's top-level block.
    pub fn program_block(&self) -> NodeId {
        match &self.kind(self.root) {
            NodeKind::Program { block } => *block,
            // finish() only accepts Program roots
            _ => self.root,
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id.index()].span
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(id.index()).copied().flatten()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id).children()
    }

    /// Ancestors from the nearest (the parent) to the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// True if `node` is `ancestor` or lies somewhere beneath it.
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        node == ancestor || self.ancestors(node).any(|a| a == ancestor)
    }

    /// `id` and everything beneath it, in pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            let children = self.children(next);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Every node reachable from the root, in pre-order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.descendants(self.root)
    }

    /// Number of nodes reachable from the root.
    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start an edit: a builder seeded with this tree's arena.
    pub fn edit(&self) -> TreeBuilder {
        TreeBuilder {
            nodes: self.nodes.clone(),
        }
    }

    /// A new tree identical to this one except that `id` has `kind`.
    pub fn with_replacement(&self, id: NodeId, kind: NodeKind) -> Result<Tree, TreeError> {
        let mut builder = self.edit();
        builder.replace(id, kind)?;
        builder.finish(self.root)
    }
}

/// Iterator over a node's ancestors, nearest first.
pub struct Ancestors<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Builder
// ══════════════════════════════════════════════════════════════════════════════

/// Allocates nodes bottom-up and produces a [`Tree`].
///
/// Children must be allocated before the node that contains them. This is
/// the interface the parser uses; the convenience constructors below are what
/// hosts and tests use to assemble programs directly.
#[derive(Debug, Default, Clone)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        self.add_spanned(kind, Span::default())
    }

    pub fn add_spanned(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, span });
        id
    }

    /// Swap the kind of an existing node, keeping its span.
    pub fn replace(&mut self, id: NodeId, kind: NodeKind) -> Result<(), TreeError> {
        let node = self
            .nodes
            .get_mut(id.index())
            .ok_or(TreeError::MissingNode(id))?;
        node.kind = kind;
        Ok(())
    }

    /// Compute the parent table from `root` and seal the tree.
    pub fn finish(self, root: NodeId) -> Result<Tree, TreeError> {
        match self.nodes.get(root.index()) {
            Some(Node {
                kind: NodeKind::Program { .. },
                ..
            }) => {}
            _ => return Err(TreeError::RootNotProgram(root)),
        }

        let mut parents: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(parent) = stack.pop() {
            for child in self.nodes[parent.index()].kind.children() {
                let Some(slot) = parents.get_mut(child.index()) else {
                    return Err(TreeError::MissingChild { parent, child });
                };
                if let Some(first) = *slot {
                    return Err(TreeError::SharedChild {
                        child,
                        first,
                        second: parent,
                    });
                }
                if child == root {
                    return Err(TreeError::SharedChild {
                        child,
                        first: root,
                        second: parent,
                    });
                }
                *slot = Some(parent);
                stack.push(child);
            }
        }

        Ok(Tree {
            nodes: self.nodes,
            parents,
            root,
        })
    }

    // ── Literals ─────────────────────────────────────────────────────────

    pub fn boolean(&mut self, value: bool) -> NodeId {
        self.add(NodeKind::BooleanLiteral(value))
    }

    pub fn number(&mut self, value: f64) -> NodeId {
        self.measurement(value, Unit::none())
    }

    pub fn measurement(&mut self, value: f64, unit: Unit) -> NodeId {
        self.add(NodeKind::NumberLiteral { value, unit })
    }

    pub fn text(&mut self, value: &str) -> NodeId {
        self.add(NodeKind::TextLiteral(value.to_string()))
    }

    pub fn none(&mut self) -> NodeId {
        self.add(NodeKind::NoneLiteral)
    }

    pub fn list(&mut self, items: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::ListLiteral(items))
    }

    pub fn set(&mut self, items: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::SetLiteral(items))
    }

    pub fn map(&mut self, pairs: Vec<(NodeId, NodeId)>) -> NodeId {
        self.add(NodeKind::MapLiteral(pairs))
    }

    // ── Names ────────────────────────────────────────────────────────────

    pub fn reference(&mut self, name: &str) -> NodeId {
        self.add(NodeKind::Reference(name.to_string()))
    }

    pub fn property(&mut self, subject: NodeId, name: &str) -> NodeId {
        self.add(NodeKind::PropertyAccess {
            subject,
            name: name.to_string(),
        })
    }

    pub fn list_access(&mut self, list: NodeId, index: NodeId) -> NodeId {
        self.add(NodeKind::ListAccess { list, index })
    }

    pub fn this(&mut self) -> NodeId {
        self.add(NodeKind::This)
    }

    // ── Operations ───────────────────────────────────────────────────────

    pub fn binary(&mut self, left: NodeId, operator: BinaryOperator, right: NodeId) -> NodeId {
        self.add(NodeKind::BinaryOperation {
            left,
            operator,
            right,
        })
    }

    pub fn unary(&mut self, operator: UnaryOperator, operand: NodeId) -> NodeId {
        self.add(NodeKind::UnaryOperation { operator, operand })
    }

    pub fn conditional(&mut self, condition: NodeId, yes: NodeId, no: NodeId) -> NodeId {
        self.add(NodeKind::Conditional { condition, yes, no })
    }

    pub fn is(&mut self, expression: NodeId, annotation: TypeAnnotation) -> NodeId {
        self.add(NodeKind::Is {
            expression,
            annotation,
        })
    }

    pub fn evaluate(&mut self, function: NodeId, inputs: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Evaluate { function, inputs })
    }

    /// `name(inputs)`: a reference evaluated as a function.
    pub fn call(&mut self, name: &str, inputs: Vec<NodeId>) -> NodeId {
        let function = self.reference(name);
        self.evaluate(function, inputs)
    }

    /// `subject.name(inputs)`
    pub fn method(&mut self, subject: NodeId, name: &str, inputs: Vec<NodeId>) -> NodeId {
        let function = self.property(subject, name);
        self.evaluate(function, inputs)
    }

    pub fn convert(&mut self, expression: NodeId, annotation: TypeAnnotation) -> NodeId {
        self.add(NodeKind::Convert {
            expression,
            annotation,
        })
    }

    // ── Streams ──────────────────────────────────────────────────────────

    pub fn previous(&mut self, stream: NodeId, count: NodeId) -> NodeId {
        self.add(NodeKind::Previous { stream, count })
    }

    pub fn changed(&mut self, stream: NodeId) -> NodeId {
        self.add(NodeKind::Changed { stream })
    }

    pub fn reaction(&mut self, initial: NodeId, condition: NodeId, next: NodeId) -> NodeId {
        self.add(NodeKind::Reaction {
            initial,
            condition,
            next,
        })
    }

    // ── Definitions ──────────────────────────────────────────────────────

    pub fn bind(&mut self, name: &str, annotation: Option<TypeAnnotation>, value: NodeId) -> NodeId {
        self.add(NodeKind::Bind {
            name: name.to_string(),
            annotation,
            value: Some(value),
        })
    }

    /// An input declaration with no default.
    pub fn input(&mut self, name: &str, annotation: Option<TypeAnnotation>) -> NodeId {
        self.add(NodeKind::Bind {
            name: name.to_string(),
            annotation,
            value: None,
        })
    }

    pub fn function(
        &mut self,
        name: &str,
        inputs: Vec<NodeId>,
        output: Option<TypeAnnotation>,
        body: Option<NodeId>,
    ) -> NodeId {
        self.add(NodeKind::FunctionDefinition {
            name: name.to_string(),
            inputs,
            output,
            body,
        })
    }

    pub fn structure(&mut self, name: &str, inputs: Vec<NodeId>, members: Option<Vec<NodeId>>) -> NodeId {
        let body = members.map(|statements| self.block(statements));
        self.add(NodeKind::StructureDefinition {
            name: name.to_string(),
            inputs,
            body,
        })
    }

    pub fn conversion(&mut self, input: TypeAnnotation, output: TypeAnnotation, body: NodeId) -> NodeId {
        self.add(NodeKind::ConversionDefinition {
            input,
            output,
            body,
        })
    }

    pub fn block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Block { statements })
    }

    pub fn unparsable(&mut self, text: &str) -> NodeId {
        self.add(NodeKind::Unparsable {
            text: text.to_string(),
        })
    }

    /// Wrap `statements` in a program block and finish the tree.
    pub fn program(mut self, statements: Vec<NodeId>) -> Result<Tree, TreeError> {
        let block = self.block(statements);
        let root = self.add(NodeKind::Program { block });
        self.finish(root)
    }
}

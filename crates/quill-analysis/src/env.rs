//! Lexical name resolution over the syntax tree.
//!
//! There is no scope stack: a name is resolved by walking the ancestors of the
//! node that uses it, nearest first, and looking at what each ancestor
//! introduces. Whatever is left falls through to the basis.

use quill_types::ast::NodeKind;
use quill_types::{NodeId, Tree};

use crate::basis::StreamKind;

// ══════════════════════════════════════════════════════════════════════════════
// Definition
// ══════════════════════════════════════════════════════════════════════════════

/// What a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Definition {
    /// A `Bind` node: a block bind, a function or structure input, or a
    /// structure member.
    Bind(NodeId),
    Function(NodeId),
    Structure(NodeId),
    /// A stream definition from the basis.
    Stream(StreamKind),
}

impl Definition {
    fn of(tree: &Tree, node: NodeId) -> Option<Definition> {
        match tree.kind(node) {
            NodeKind::Bind { .. } => Some(Definition::Bind(node)),
            NodeKind::FunctionDefinition { .. } => Some(Definition::Function(node)),
            NodeKind::StructureDefinition { .. } => Some(Definition::Structure(node)),
            _ => None,
        }
    }

    /// The defining node, for definitions that live in the tree.
    pub fn node(self) -> Option<NodeId> {
        match self {
            Definition::Bind(n) | Definition::Function(n) | Definition::Structure(n) => Some(n),
            Definition::Stream(_) => None,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Scope kinds
// ══════════════════════════════════════════════════════════════════════════════

/// The kind of evaluation frame a node's code runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The program's top-level block.
    Program,
    /// A function body.
    Function(NodeId),
    /// A structure body, evaluated when the structure is created.
    Structure(NodeId),
    /// A conversion body.
    Conversion(NodeId),
}

/// The innermost frame-introducing definition enclosing `node`.
pub fn enclosing_scope(tree: &Tree, node: NodeId) -> ScopeKind {
    for ancestor in tree.ancestors(node) {
        match tree.kind(ancestor) {
            NodeKind::FunctionDefinition { .. } => return ScopeKind::Function(ancestor),
            NodeKind::StructureDefinition { .. } => return ScopeKind::Structure(ancestor),
            NodeKind::ConversionDefinition { .. } => return ScopeKind::Conversion(ancestor),
            _ => {}
        }
    }
    ScopeKind::Program
}

// ══════════════════════════════════════════════════════════════════════════════
// Lookup
// ══════════════════════════════════════════════════════════════════════════════

/// The first statement or input in `nodes` that defines `name`.
pub fn find_named(tree: &Tree, nodes: &[NodeId], name: &str) -> Option<NodeId> {
    nodes
        .iter()
        .copied()
        .find(|n| tree.kind(*n).defined_name() == Some(name))
}

/// Resolve `name` as seen from `at`.
///
/// Search order per ancestor, nearest first: function inputs, structure
/// inputs, block statements (which covers structure members and the program
/// block). Then the basis.
pub fn resolve_name(tree: &Tree, name: &str, at: NodeId) -> Option<Definition> {
    for ancestor in tree.ancestors(at) {
        let found = match tree.kind(ancestor) {
            NodeKind::FunctionDefinition { inputs, .. }
            | NodeKind::StructureDefinition { inputs, .. } => find_named(tree, inputs, name),
            NodeKind::Block { statements } => find_named(tree, statements, name),
            _ => None,
        };
        if let Some(definition) = found.and_then(|node| Definition::of(tree, node)) {
            return Some(definition);
        }
    }
    StreamKind::from_name(name).map(Definition::Stream)
}

/// A member of a structure definition: an input or a statement in its body.
pub fn structure_member(tree: &Tree, structure: NodeId, name: &str) -> Option<NodeId> {
    let NodeKind::StructureDefinition { inputs, body, .. } = tree.kind(structure) else {
        return None;
    };
    if let Some(input) = find_named(tree, inputs, name) {
        return Some(input);
    }
    let body = (*body)?;
    match tree.kind(body) {
        NodeKind::Block { statements } => find_named(tree, statements, name),
        _ => None,
    }
}

/// The statements of a structure's body, or nothing for a bodiless one.
pub fn structure_statements(tree: &Tree, structure: NodeId) -> &[NodeId] {
    let NodeKind::StructureDefinition { body: Some(body), .. } = tree.kind(structure) else {
        return &[];
    };
    match tree.kind(*body) {
        NodeKind::Block { statements } => statements,
        _ => &[],
    }
}

/// True if `block` is the body of a structure definition.
pub fn is_structure_body(tree: &Tree, block: NodeId) -> bool {
    tree.parent(block).is_some_and(|parent| {
        matches!(tree.kind(parent), NodeKind::StructureDefinition { body: Some(b), .. } if *b == block)
    })
}

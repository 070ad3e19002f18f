//! Steps and their compilation.
//!
//! Each node compiles to a flat sequence of steps. Every node contributes a
//! `Start` and a `Finish`; children's sequences sit between them in
//! evaluation order. Branching nodes add control steps:
//!
//! ```text
//! Conditional  Start  condition  JumpIf(⊥, |yes|+1)  yes  Jump(|no|)  no  Finish
//! Reaction     Start  Check  initial  Jump(|condition|+1+|next|)
//!                     condition  JumpIf(⊥, |next|)  next  Finish
//! ```
//!
//! Jump counts are relative: the number of steps skipped after the jump.

use std::collections::HashMap;
use std::rc::Rc;

use quill_types::ast::NodeKind;
use quill_types::{NodeId, Tree};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EvalResult;

/// One unit of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Start(NodeId),
    /// A reaction deciding between its initial value and its condition.
    Check(NodeId),
    Jump { node: NodeId, count: usize },
    /// Pop a boolean and skip `count` steps when it equals `when`.
    JumpIf { node: NodeId, count: usize, when: bool },
    Finish(NodeId),
}

impl Step {
    /// The node this step belongs to.
    pub fn node(&self) -> NodeId {
        match self {
            Step::Start(node)
            | Step::Check(node)
            | Step::Finish(node)
            | Step::Jump { node, .. }
            | Step::JumpIf { node, .. } => *node,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Log
// ══════════════════════════════════════════════════════════════════════════════

/// The steps executed so far in the current pass, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLog {
    steps: Vec<Step>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn get(&self, index: usize) -> Option<Step> {
        self.steps.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// SHA-256 of the serialized log, hex encoded.
    pub fn fingerprint(&self) -> EvalResult<String> {
        let bytes = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Compilation
// ══════════════════════════════════════════════════════════════════════════════

/// What a frame runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A node's own steps.
    Node(NodeId),
    /// A call of a function or structure definition given `provided`
    /// inputs: the defaults of the inputs left out, then the body.
    Call { definition: NodeId, provided: usize },
}

/// Compiled step sequences, built on demand and shared.
#[derive(Debug, Default)]
pub struct Compiled {
    sequences: HashMap<Shape, Rc<[Step]>>,
}

impl Compiled {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&mut self, tree: &Tree, shape: Shape) -> Rc<[Step]> {
        if let Some(steps) = self.sequences.get(&shape) {
            return Rc::clone(steps);
        }
        let steps: Rc<[Step]> = match shape {
            Shape::Node(node) => self.compile(tree, node).into(),
            Shape::Call {
                definition,
                provided,
            } => self.compile_call(tree, definition, provided).into(),
        };
        self.sequences.insert(shape, Rc::clone(&steps));
        steps
    }

    /// Number of steps `node` compiles to.
    pub fn len(&mut self, tree: &Tree, node: NodeId) -> usize {
        self.steps(tree, Shape::Node(node)).len()
    }

    fn compile(&mut self, tree: &Tree, node: NodeId) -> Vec<Step> {
        let mut steps = vec![Step::Start(node)];
        match tree.kind(node) {
            NodeKind::Conditional { condition, yes, no } => {
                let yes = self.steps(tree, Shape::Node(*yes));
                let no = self.steps(tree, Shape::Node(*no));
                steps.extend(self.steps(tree, Shape::Node(*condition)).iter());
                steps.push(Step::JumpIf {
                    node,
                    count: yes.len() + 1,
                    when: false,
                });
                steps.extend(yes.iter());
                steps.push(Step::Jump {
                    node,
                    count: no.len(),
                });
                steps.extend(no.iter());
            }
            NodeKind::Reaction {
                initial,
                condition,
                next,
            } => {
                let initial = self.steps(tree, Shape::Node(*initial));
                let condition = self.steps(tree, Shape::Node(*condition));
                let next = self.steps(tree, Shape::Node(*next));
                steps.push(Step::Check(node));
                steps.extend(initial.iter());
                steps.push(Step::Jump {
                    node,
                    count: condition.len() + 1 + next.len(),
                });
                steps.extend(condition.iter());
                steps.push(Step::JumpIf {
                    node,
                    count: next.len(),
                    when: false,
                });
                steps.extend(next.iter());
            }
            // Definitions run their bodies in their own frames.
            NodeKind::FunctionDefinition { .. }
            | NodeKind::StructureDefinition { .. }
            | NodeKind::ConversionDefinition { .. } => {}
            kind => {
                for child in kind.children() {
                    steps.extend(self.steps(tree, Shape::Node(child)).iter());
                }
            }
        }
        steps.push(Step::Finish(node));
        steps
    }

    fn compile_call(&mut self, tree: &Tree, definition: NodeId, provided: usize) -> Vec<Step> {
        let (inputs, body) = match tree.kind(definition) {
            NodeKind::FunctionDefinition { inputs, body, .. }
            | NodeKind::StructureDefinition { inputs, body, .. } => (inputs.as_slice(), *body),
            NodeKind::ConversionDefinition { body, .. } => (&[][..], Some(*body)),
            _ => (&[][..], None),
        };
        let mut steps = Vec::new();
        for input in inputs.iter().skip(provided) {
            if matches!(tree.kind(*input), NodeKind::Bind { value: Some(_), .. }) {
                steps.extend(self.steps(tree, Shape::Node(*input)).iter());
            }
        }
        if let Some(body) = body {
            steps.extend(self.steps(tree, Shape::Node(body)).iter());
        }
        steps
    }
}

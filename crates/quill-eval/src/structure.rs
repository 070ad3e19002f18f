//! Structured records.

use std::collections::BTreeMap;
use std::fmt;

use quill_analysis::env;
use quill_types::ast::NodeKind;
use quill_types::{NodeId, Tree};

use crate::evaluation::{EvaluationId, Evaluations};
use crate::value::Value;

/// An instance of a structure definition.
///
/// Backed by the evaluation that constructed it. The bindings are copied out
/// when construction finishes, after which that evaluation never changes, so
/// the copy and the arena entry agree for the rest of the pass.
#[derive(Debug, Clone)]
pub struct Structure {
    definition: NodeId,
    name: String,
    evaluation: EvaluationId,
    /// Input names in declaration order.
    inputs: Vec<String>,
    bindings: BTreeMap<String, Value>,
}

impl Structure {
    /// Freeze the structure evaluation `id`.
    pub fn from_evaluation(tree: &Tree, evaluations: &Evaluations, id: EvaluationId) -> Self {
        let evaluation = evaluations.get(id);
        let definition = evaluation.definition();
        let (name, inputs) = match tree.kind(definition) {
            NodeKind::StructureDefinition { name, inputs, .. } => (
                name.clone(),
                inputs
                    .iter()
                    .filter_map(|i| tree.kind(*i).defined_name().map(str::to_string))
                    .collect(),
            ),
            _ => (String::new(), Vec::new()),
        };
        Self {
            definition,
            name,
            evaluation: id,
            inputs,
            bindings: evaluation.bindings().clone(),
        }
    }

    pub fn definition(&self) -> NodeId {
        self.definition
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluation(&self) -> EvaluationId {
        self.evaluation
    }

    /// A value bound while constructing this structure.
    pub fn resolve(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// A member the definition declares, for names construction never bound
    /// (abstract functions, or members after an early exception).
    pub fn member(&self, tree: &Tree, name: &str) -> Option<NodeId> {
        env::structure_member(tree, self.definition, name)
    }

    /// Same definition and equal inputs.
    pub fn is_equal_to(&self, other: &Structure) -> bool {
        self.definition == other.definition
            && self.inputs.iter().all(|input| {
                match (self.resolve(input), other.resolve(input)) {
                    (Some(a), Some(b)) => a.is_equal_to(b),
                    (None, None) => true,
                    _ => false,
                }
            })
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for input in &self.inputs {
            let Some(value) = self.resolve(input) else {
                continue;
            };
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{input}: {value}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{Evaluation, EvaluationKind};
    use quill_types::ast::TypeAnnotation;
    use quill_types::TreeBuilder;

    fn cat_tree() -> (Tree, NodeId) {
        let mut b = TreeBuilder::new();
        let name = b.input("name", Some(TypeAnnotation::Text));
        let lives = b.input("lives", Some(TypeAnnotation::number()));
        let cat = b.structure("Cat", vec![name, lives], Some(vec![]));
        let end = b.none();
        (b.program(vec![cat, end]).unwrap(), cat)
    }

    fn construct(tree: &Tree, cat: NodeId, name: &str, lives: f64) -> Structure {
        let mut evaluations = Evaluations::new();
        evaluations.push(Evaluation::new(EvaluationKind::Program, tree.root(), None));
        let id = evaluations.push(Evaluation::new(
            EvaluationKind::Structure,
            cat,
            Some(EvaluationId::ROOT),
        ));
        evaluations.get_mut(id).bind("name", Value::text(name));
        evaluations.get_mut(id).bind("lives", Value::number(lives));
        Structure::from_evaluation(tree, &evaluations, id)
    }

    #[test]
    fn display_lists_inputs_in_order() {
        let (tree, cat) = cat_tree();
        let tom = construct(&tree, cat, "Tom", 9.0);
        assert_eq!(tom.to_string(), "Cat(name: 'Tom' lives: 9)");
        assert_eq!(tom.resolve("lives"), Some(&Value::number(9.0)));
    }

    #[test]
    fn equality_compares_inputs() {
        let (tree, cat) = cat_tree();
        let a = construct(&tree, cat, "Tom", 9.0);
        let b = construct(&tree, cat, "Tom", 9.0);
        let c = construct(&tree, cat, "Tom", 8.0);
        assert!(a.is_equal_to(&b));
        assert!(!a.is_equal_to(&c));
    }

    #[test]
    fn member_falls_back_to_definition() {
        let (tree, cat) = cat_tree();
        let tom = construct(&tree, cat, "Tom", 9.0);
        assert!(tom.member(&tree, "lives").is_some());
        assert!(tom.member(&tree, "whiskers").is_none());
    }
}

//! Structured static diagnostics.
//!
//! A [`Conflict`] is attached to the node it was found on. It never carries
//! user-facing text: each explanation is a request (`node` plus a template
//! key plus the types involved) that an external [`Translator`] renders.

use quill_types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ty::Type;

// ══════════════════════════════════════════════════════════════════════════════
// Kinds
// ══════════════════════════════════════════════════════════════════════════════

/// Every kind of conflict the checker reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    // ── Fatal: the program cannot be evaluated ──
    Unparsable,
    ExpectedEndingExpression,
    DuplicateName,
    RequiredAfterOptional,
    MisplacedConversion,
    DisallowedInputs,

    // ── Advisory ──
    UnknownName,
    UnknownProperty,
    IncompatibleBind,
    IncompatibleOperand,
    ExpectedBooleanCondition,
    ImpossibleType,
    NotAFunction,
    MissingInput,
    TooManyInputs,
    IncompatibleInput,
    NotAList,
    UnknownConversion,
    NotAStream,
    UnusedBind,
}

impl ConflictKind {
    /// Fatal conflicts describe shapes the evaluator has no meaning for.
    /// Everything else still evaluates, possibly to an exception.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::Unparsable
                | Self::ExpectedEndingExpression
                | Self::DuplicateName
                | Self::RequiredAfterOptional
                | Self::MisplacedConversion
                | Self::DisallowedInputs
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unparsable => "Unparsable",
            Self::ExpectedEndingExpression => "ExpectedEndingExpression",
            Self::DuplicateName => "DuplicateName",
            Self::RequiredAfterOptional => "RequiredAfterOptional",
            Self::MisplacedConversion => "MisplacedConversion",
            Self::DisallowedInputs => "DisallowedInputs",
            Self::UnknownName => "UnknownName",
            Self::UnknownProperty => "UnknownProperty",
            Self::IncompatibleBind => "IncompatibleBind",
            Self::IncompatibleOperand => "IncompatibleOperand",
            Self::ExpectedBooleanCondition => "ExpectedBooleanCondition",
            Self::ImpossibleType => "ImpossibleType",
            Self::NotAFunction => "NotAFunction",
            Self::MissingInput => "MissingInput",
            Self::TooManyInputs => "TooManyInputs",
            Self::IncompatibleInput => "IncompatibleInput",
            Self::NotAList => "NotAList",
            Self::UnknownConversion => "UnknownConversion",
            Self::NotAStream => "NotAStream",
            Self::UnusedBind => "UnusedBind",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Conflict
// ══════════════════════════════════════════════════════════════════════════════

/// A request to explain one locus of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// The node to highlight.
    pub node: NodeId,
    /// Template key, e.g. `DuplicateName.secondary`.
    pub template: String,
    /// Types the template refers to, in template order.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub types: Vec<Type>,
}

/// A static finding attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub primary: Explanation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Explanation>,
    pub fatal: bool,
}

impl Conflict {
    pub fn new(kind: ConflictKind, node: NodeId) -> Self {
        Self {
            kind,
            primary: Explanation {
                node,
                template: format!("{kind}.primary"),
                types: Vec::new(),
            },
            secondary: None,
            fatal: kind.is_fatal(),
        }
    }

    /// Point the secondary explanation at a related node, such as the earlier
    /// declaration a duplicate collides with.
    pub fn with_secondary(mut self, node: NodeId) -> Self {
        self.secondary = Some(Explanation {
            node,
            template: format!("{}.secondary", self.kind),
            types: Vec::new(),
        });
        self
    }

    /// Attach the types involved (typically expected, then received).
    pub fn with_types(mut self, types: Vec<Type>) -> Self {
        if let Some(secondary) = &mut self.secondary {
            secondary.types = types.clone();
        }
        self.primary.types = types;
        self
    }

    /// The node the conflict is reported on.
    pub fn node(&self) -> NodeId {
        self.primary.node
    }

    pub fn primary(&self) -> &Explanation {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&Explanation> {
        self.secondary.as_ref()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.primary.node)?;
        if let Some(secondary) = &self.secondary {
            write!(f, " (see {})", secondary.node)?;
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Batch
// ══════════════════════════════════════════════════════════════════════════════

/// All conflicts found in a tree, in pre-order of the nodes they are on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conflicts {
    pub conflicts: Vec<Conflict>,
}

impl Conflicts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, conflict: Conflict) {
        self.conflicts.push(conflict);
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Conflict> {
        self.conflicts.iter()
    }

    pub fn fatal(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| c.fatal)
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal().next().is_some()
    }

    pub fn for_node(&self, node: NodeId) -> Vec<&Conflict> {
        self.conflicts.iter().filter(|c| c.node() == node).collect()
    }

    pub fn of_kind(&self, kind: ConflictKind) -> Vec<&Conflict> {
        self.conflicts.iter().filter(|c| c.kind == kind).collect()
    }
}

impl Extend<Conflict> for Conflicts {
    fn extend<I: IntoIterator<Item = Conflict>>(&mut self, iter: I) {
        self.conflicts.extend(iter);
    }
}

impl IntoIterator for Conflicts {
    type Item = Conflict;
    type IntoIter = std::vec::IntoIter<Conflict>;

    fn into_iter(self) -> Self::IntoIter {
        self.conflicts.into_iter()
    }
}

impl<'a> IntoIterator for &'a Conflicts {
    type Item = &'a Conflict;
    type IntoIter = std::slice::Iter<'a, Conflict>;

    fn into_iter(self) -> Self::IntoIter {
        self.conflicts.iter()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Translation
// ══════════════════════════════════════════════════════════════════════════════

/// Renders explanation requests into text. Implemented outside the core.
pub trait Translator {
    /// Text for one explanation locus.
    fn explain(&self, explanation: &Explanation) -> String;

    /// Text describing a node kind, keyed by [`NodeKind::descriptor`](quill_types::ast::NodeKind::descriptor).
    fn describe(&self, descriptor: &str) -> String;

    /// Primary and (if present) secondary text for a conflict.
    fn render(&self, conflict: &Conflict) -> (String, Option<String>) {
        (
            self.explain(conflict.primary()),
            conflict.secondary().map(|s| self.explain(s)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_follows_kind() {
        assert!(Conflict::new(ConflictKind::DuplicateName, NodeId(1)).is_fatal());
        assert!(Conflict::new(ConflictKind::Unparsable, NodeId(1)).is_fatal());
        assert!(!Conflict::new(ConflictKind::UnusedBind, NodeId(1)).is_fatal());
        assert!(!Conflict::new(ConflictKind::UnknownName, NodeId(1)).is_fatal());
    }

    #[test]
    fn test_explanation_templates() {
        let c = Conflict::new(ConflictKind::DuplicateName, NodeId(7)).with_secondary(NodeId(2));
        assert_eq!(c.primary().template, "DuplicateName.primary");
        assert_eq!(c.primary().node, NodeId(7));
        let secondary = c.secondary().unwrap();
        assert_eq!(secondary.template, "DuplicateName.secondary");
        assert_eq!(secondary.node, NodeId(2));
        assert_eq!(c.to_string(), "DuplicateName at #7 (see #2)");
    }

    #[test]
    fn test_batch_queries() {
        let mut batch = Conflicts::new();
        batch.push(Conflict::new(ConflictKind::UnusedBind, NodeId(3)));
        batch.push(Conflict::new(ConflictKind::Unparsable, NodeId(4)));
        batch.push(Conflict::new(ConflictKind::UnknownName, NodeId(3)));
        assert!(batch.has_fatal());
        assert_eq!(batch.fatal().count(), 1);
        assert_eq!(batch.for_node(NodeId(3)).len(), 2);
        assert_eq!(batch.of_kind(ConflictKind::Unparsable).len(), 1);
    }

    #[test]
    fn test_conflict_json() {
        let c = Conflict::new(ConflictKind::IncompatibleBind, NodeId(5))
            .with_types(vec![Type::Text, Type::Boolean]);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["kind"], "IncompatibleBind");
        assert_eq!(json["fatal"], false);
        assert_eq!(json["primary"]["node"], 5);
        assert!(json.get("secondary").is_none());
    }

    struct Echo;

    impl Translator for Echo {
        fn explain(&self, explanation: &Explanation) -> String {
            format!("{}@{}", explanation.template, explanation.node)
        }

        fn describe(&self, descriptor: &str) -> String {
            descriptor.to_lowercase()
        }
    }

    #[test]
    fn test_translator_render() {
        let c = Conflict::new(ConflictKind::MissingInput, NodeId(9)).with_secondary(NodeId(1));
        let (primary, secondary) = Echo.render(&c);
        assert_eq!(primary, "MissingInput.primary@#9");
        assert_eq!(secondary.as_deref(), Some("MissingInput.secondary@#1"));
        assert_eq!(Echo.describe("Bind"), "bind");
    }
}

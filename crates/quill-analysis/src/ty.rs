//! Semantic type representation.
//!
//! [`Type`] is the type the analyzer reasons about. It is distinct from
//! [`quill_types::ast::TypeAnnotation`], which is the syntactic form written
//! in source; annotations are resolved into types by
//! [`Context::annotation_type`](crate::Context::annotation_type).

use quill_types::{NodeId, Unit};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::type_set::TypeSet;

// ══════════════════════════════════════════════════════════════════════════════
// Type
// ══════════════════════════════════════════════════════════════════════════════

/// A semantic type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    // ── Primitives ──
    Boolean,
    Text,
    /// A number with a unit. `None` is the generic number type, which accepts
    /// every unit.
    Measurement(Option<Unit>),
    None,

    // ── Collections ──
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>, Box<Type>),

    // ── Definitions ──
    /// Instances of a structure definition. Two structure types are the same
    /// exactly when they name the same definition node.
    Structure { definition: NodeId, name: String },
    /// `(inputs) → output`
    Function(Vec<Type>, Box<Type>),
    /// The values a stream produces.
    Stream(Box<Type>),

    // ── Algebra ──
    Union(Box<Type>, Box<Type>),
    /// The empty type. Every type accepts it; it accepts only itself.
    Never,
    /// The analyzer could not determine the type. Compatible with anything.
    Unknown(UnknownReason),
}

/// Why a type could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnknownReason {
    /// The type depends on itself.
    Cycle,
    /// A name or property did not resolve.
    Unresolved,
    /// Source that failed to parse.
    Unparsable,
    /// An input with neither an annotation nor a default.
    Unannotated,
    /// An operation the operand types do not support.
    Unsupported,
}

impl Type {
    /// The unitless number type of plain numeric literals.
    pub fn number() -> Self {
        Type::Measurement(Some(Unit::none()))
    }

    pub fn measurement(unit: Unit) -> Self {
        Type::Measurement(Some(unit))
    }

    pub fn list(item: Type) -> Self {
        Type::List(Box::new(item))
    }

    pub fn set(item: Type) -> Self {
        Type::Set(Box::new(item))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn stream(item: Type) -> Self {
        Type::Stream(Box::new(item))
    }

    pub fn function(inputs: Vec<Type>, output: Type) -> Self {
        Type::Function(inputs, Box::new(output))
    }

    pub fn union(left: Type, right: Type) -> Self {
        Type::Union(Box::new(left), Box::new(right))
    }

    /// Deduplicate `types` by compatibility (first seen wins) and fold the
    /// survivors into a right-nested union. `None` when `types` is empty.
    pub fn union_of(types: impl IntoIterator<Item = Type>) -> Option<Type> {
        let set = TypeSet::new(types);
        if set.is_empty() {
            None
        } else {
            Some(set.fold())
        }
    }

    /// True if a value of type `other` may be used where `self` is expected.
    ///
    /// Rules:
    /// - `Unknown` accepts and is accepted by everything (error recovery)
    /// - `Never` is accepted by everything and accepts only `Never`
    /// - a union source is accepted if every member is
    /// - a union target accepts if either side does
    /// - collections and streams are covariant
    /// - structures compare definition identity
    /// - functions are contravariant in inputs, covariant in output
    /// - the generic number type accepts any unit
    pub fn accepts(&self, other: &Type) -> bool {
        if matches!(self, Type::Unknown(_)) || matches!(other, Type::Unknown(_)) {
            return true;
        }
        if let Type::Never = other {
            return true;
        }
        if let Type::Union(a, b) = other {
            return self.accepts(a) && self.accepts(b);
        }
        match (self, other) {
            (Type::Union(a, b), _) => a.accepts(other) || b.accepts(other),
            (Type::Never, _) => false,
            (Type::Boolean, Type::Boolean)
            | (Type::Text, Type::Text)
            | (Type::None, Type::None) => true,
            (Type::Measurement(None), Type::Measurement(_)) => true,
            (Type::Measurement(Some(a)), Type::Measurement(Some(b))) => a == b,
            (Type::List(a), Type::List(b))
            | (Type::Set(a), Type::Set(b))
            | (Type::Stream(a), Type::Stream(b)) => a.accepts(b),
            (Type::Map(ak, av), Type::Map(bk, bv)) => ak.accepts(bk) && av.accepts(bv),
            (Type::Structure { definition: a, .. }, Type::Structure { definition: b, .. }) => {
                a == b
            }
            (Type::Function(self_inputs, self_output), Type::Function(other_inputs, other_output)) => {
                self_inputs.len() == other_inputs.len()
                    && self_inputs
                        .iter()
                        .zip(other_inputs)
                        .all(|(mine, theirs)| theirs.accepts(mine))
                    && self_output.accepts(other_output)
            }
            _ => false,
        }
    }

    /// Members of a union, flattened; a non-union is its own only member.
    pub fn members(&self) -> Vec<&Type> {
        match self {
            Type::Union(a, b) => {
                let mut out = a.members();
                out.extend(b.members());
                out
            }
            other => vec![other],
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown(_))
    }

    /// True for `Boolean`, or any type that might be one after recovery.
    pub fn is_boolean(&self) -> bool {
        self.is_unknown() || Type::Boolean.accepts(self)
    }

    pub fn is_measurement(&self) -> bool {
        self.is_unknown() || Type::Measurement(None).accepts(self)
    }

    pub fn is_text(&self) -> bool {
        self.is_unknown() || Type::Text.accepts(self)
    }

    /// The unit of a measurement type, if it has a fixed one.
    pub fn unit(&self) -> Option<&Unit> {
        match self {
            Type::Measurement(Some(unit)) => Some(unit),
            _ => None,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Display
// ══════════════════════════════════════════════════════════════════════════════

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Boolean => write!(f, "?"),
            Type::Text => write!(f, "''"),
            Type::Measurement(None) => write!(f, "#"),
            Type::Measurement(Some(unit)) => write!(f, "#{unit}"),
            Type::None => write!(f, "ø"),
            Type::List(item) => write!(f, "[{item}]"),
            Type::Set(item) => write!(f, "{{{item}}}"),
            Type::Map(key, value) => write!(f, "{{{key}:{value}}}"),
            Type::Structure { name, .. } => write!(f, "{name}"),
            Type::Function(inputs, output) => {
                write!(f, "ƒ(")?;
                for (i, input) in inputs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{input}")?;
                }
                write!(f, ") {output}")
            }
            Type::Stream(item) => write!(f, "…{item}"),
            Type::Union(a, b) => write!(f, "{a}|{b}"),
            Type::Never => write!(f, "never"),
            Type::Unknown(_) => write!(f, "unknown"),
        }
    }
}

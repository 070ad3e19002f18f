//! Runtime values.
//!
//! Values are immutable once built. Composite values own their items;
//! structures and exceptions are shared behind `Rc` since they are copied
//! onto value stacks far more often than they are inspected.

use std::fmt;
use std::rc::Rc;

use quill_analysis::basis::{StreamKind, TextMethod};
use quill_analysis::{Type, UnknownReason};
use quill_types::{NodeId, Unit};

use crate::error::Exception;
use crate::evaluation::EvaluationId;
use crate::stream::StreamId;
use crate::structure::Structure;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Boolean(bool),
    Text(String),
    Measurement { number: f64, unit: Unit },
    List(Vec<Value>),
    /// Items are unique under [`Value::is_equal_to`].
    Set(Vec<Value>),
    /// Keys are unique under [`Value::is_equal_to`].
    Map(Vec<(Value, Value)>),
    Structure(Rc<Structure>),
    Exception(Rc<Exception>),
    /// A handle to a stream owned by the evaluator.
    Stream(StreamId),
    Function(Rc<Callable>),
}

/// Something an `Evaluate` node can call.
#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    /// A function definition, closed over the evaluation it was defined in.
    Function { definition: NodeId, closure: EvaluationId },
    Structure { definition: NodeId, closure: EvaluationId },
    Conversion { definition: NodeId, closure: EvaluationId },
    /// A text method bound to the text it was read from.
    Text { method: TextMethod, receiver: String },
    Stream(StreamKind),
}

impl Callable {
    pub fn definition(&self) -> Option<NodeId> {
        match self {
            Callable::Function { definition, .. }
            | Callable::Structure { definition, .. }
            | Callable::Conversion { definition, .. } => Some(*definition),
            Callable::Text { .. } | Callable::Stream(_) => None,
        }
    }
}

impl Value {
    pub fn number(number: f64) -> Self {
        Value::Measurement {
            number,
            unit: Unit::none(),
        }
    }

    pub fn measurement(number: f64, unit: Unit) -> Self {
        Value::Measurement { number, unit }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Value::Text(text.into())
    }

    /// A set of `items`, dropping later duplicates.
    pub fn set(items: Vec<Value>) -> Self {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.iter().any(|u| u.is_equal_to(&item)) {
                unique.push(item);
            }
        }
        Value::Set(unique)
    }

    /// A map of `pairs`. A repeated key keeps its last value.
    pub fn map(pairs: Vec<(Value, Value)>) -> Self {
        let mut unique: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            match unique.iter_mut().find(|(k, _)| k.is_equal_to(&key)) {
                Some(entry) => entry.1 = value,
                None => unique.push((key, value)),
            }
        }
        Value::Map(unique)
    }

    pub fn function(callable: Callable) -> Self {
        Value::Function(Rc::new(callable))
    }

    pub fn exception(exception: Exception) -> Self {
        Value::Exception(Rc::new(exception))
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Measurement { number, .. } => Some(*number),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<StreamId> {
        match self {
            Value::Stream(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_exception(&self) -> Option<&Exception> {
        match self {
            Value::Exception(exception) => Some(exception),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Value::Exception(_))
    }

    // ── Semantics ────────────────────────────────────────────────────────

    /// Structural equality. Lists compare in order, sets and maps ignore
    /// order, and streams compare by identity.
    pub fn is_equal_to(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (
                Value::Measurement { number: a, unit: ua },
                Value::Measurement { number: b, unit: ub },
            ) => a == b && ua == ub,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_equal_to(y))
            }
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.is_equal_to(y)))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter()
                            .any(|(k2, v2)| k.is_equal_to(k2) && v.is_equal_to(v2))
                    })
            }
            (Value::Structure(a), Value::Structure(b)) => a.is_equal_to(b),
            (Value::Exception(a), Value::Exception(b)) => a == b,
            (Value::Stream(a), Value::Stream(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }

    /// The runtime type of this value.
    pub fn type_of(&self) -> Type {
        match self {
            Value::None => Type::None,
            Value::Boolean(_) => Type::Boolean,
            Value::Text(_) => Type::Text,
            Value::Measurement { unit, .. } => Type::measurement(unit.clone()),
            Value::List(items) => Type::list(item_type(items.iter())),
            Value::Set(items) => Type::set(item_type(items.iter())),
            Value::Map(pairs) => Type::map(
                item_type(pairs.iter().map(|(k, _)| k)),
                item_type(pairs.iter().map(|(_, v)| v)),
            ),
            Value::Structure(structure) => Type::Structure {
                definition: structure.definition(),
                name: structure.name().to_string(),
            },
            Value::Stream(_) => Type::stream(Type::Unknown(UnknownReason::Unsupported)),
            Value::Function(callable) => match callable.as_ref() {
                Callable::Text { method, .. } => method.signature().function_type(),
                Callable::Stream(kind) => kind.signature().function_type(),
                _ => Type::Unknown(UnknownReason::Unsupported),
            },
            Value::Exception(_) => Type::Unknown(UnknownReason::Unsupported),
        }
    }

    /// True if the value may be reused on a later evaluation pass. Values
    /// that point into a pass's evaluations are not.
    pub fn is_portable(&self) -> bool {
        match self {
            Value::None
            | Value::Boolean(_)
            | Value::Text(_)
            | Value::Measurement { .. }
            | Value::Stream(_)
            | Value::Exception(_) => true,
            Value::List(items) | Value::Set(items) => items.iter().all(Value::is_portable),
            Value::Map(pairs) => pairs.iter().all(|(k, v)| k.is_portable() && v.is_portable()),
            Value::Function(callable) => matches!(
                callable.as_ref(),
                Callable::Text { .. } | Callable::Stream(_)
            ),
            Value::Structure(_) => false,
        }
    }
}

fn item_type<'a>(items: impl Iterator<Item = &'a Value>) -> Type {
    Type::union_of(items.map(Value::type_of)).unwrap_or(Type::Never)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal_to(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Display
// ══════════════════════════════════════════════════════════════════════════════

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "ø"),
            Value::Boolean(true) => write!(f, "⊤"),
            Value::Boolean(false) => write!(f, "⊥"),
            Value::Text(text) => write!(f, "'{text}'"),
            Value::Measurement { number, unit } => write!(f, "{number}{unit}"),
            Value::List(items) => {
                write!(f, "[")?;
                write_items(f, items)?;
                write!(f, "]")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                write_items(f, items)?;
                write!(f, "}}")
            }
            Value::Map(pairs) if pairs.is_empty() => write!(f, "{{:}}"),
            Value::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "}}")
            }
            Value::Structure(structure) => write!(f, "{structure}"),
            Value::Exception(exception) => write!(f, "{exception}"),
            Value::Stream(id) => write!(f, "stream {id}"),
            Value::Function(callable) => match callable.as_ref() {
                Callable::Function { definition, .. } => write!(f, "ƒ {definition}"),
                Callable::Structure { definition, .. } => write!(f, "•{definition}"),
                Callable::Conversion { definition, .. } => write!(f, "→ {definition}"),
                Callable::Text { method, .. } => write!(f, "ƒ {}", method.name()),
                Callable::Stream(kind) => write!(f, "ƒ {}", kind.name()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[f64]) -> Value {
        Value::List(items.iter().map(|n| Value::number(*n)).collect())
    }

    #[test]
    fn list_equality_is_ordered() {
        assert!(list(&[]).is_equal_to(&list(&[])));
        assert!(list(&[1.0]).is_equal_to(&list(&[1.0])));
        assert!(!list(&[1.0]).is_equal_to(&list(&[1.0, 2.0])));
        assert!(!list(&[1.0, 2.0]).is_equal_to(&list(&[2.0, 1.0])));
    }

    #[test]
    fn set_and_map_equality_ignore_order() {
        let a = Value::set(vec![1.0.into(), 2.0.into()]);
        let b = Value::set(vec![2.0.into(), 1.0.into(), 2.0.into()]);
        assert!(a.is_equal_to(&b));

        let m1 = Value::map(vec![("a".into(), 1.0.into()), ("b".into(), 2.0.into())]);
        let m2 = Value::map(vec![("b".into(), 2.0.into()), ("a".into(), 1.0.into())]);
        assert!(m1.is_equal_to(&m2));
        let m3 = Value::map(vec![("a".into(), 1.0.into()), ("b".into(), 3.0.into())]);
        assert!(!m1.is_equal_to(&m3));
    }

    #[test]
    fn map_keeps_last_value_for_repeated_key() {
        let m = Value::map(vec![("a".into(), 1.0.into()), ("a".into(), 2.0.into())]);
        assert_eq!(m, Value::map(vec![("a".into(), 2.0.into())]));
    }

    #[test]
    fn units_take_part_in_equality() {
        let ms = Value::measurement(1.0, Unit::of("ms"));
        assert_ne!(ms, Value::number(1.0));
        assert_eq!(ms, Value::measurement(1.0, Unit::of("ms")));
    }

    #[test]
    fn streams_compare_by_identity() {
        assert_eq!(Value::Stream(StreamId(0)), Value::Stream(StreamId(0)));
        assert_ne!(Value::Stream(StreamId(0)), Value::Stream(StreamId(1)));
    }

    #[test]
    fn runtime_types() {
        assert_eq!(Value::number(1.0).type_of(), Type::number());
        assert_eq!(list(&[]).type_of(), Type::list(Type::Never));
        assert_eq!(
            Value::List(vec![1.0.into(), "a".into()]).type_of(),
            Type::list(Type::union(Type::number(), Type::Text))
        );
    }

    #[test]
    fn display_symbols() {
        assert_eq!(Value::None.to_string(), "ø");
        assert_eq!(Value::Boolean(true).to_string(), "⊤");
        assert_eq!(Value::Boolean(false).to_string(), "⊥");
        assert_eq!(list(&[1.0, 2.5]).to_string(), "[1 2.5]");
        assert_eq!(Value::measurement(5.0, Unit::of("ms")).to_string(), "5ms");
        assert_eq!(Value::map(vec![]).to_string(), "{:}");
    }

    #[test]
    fn portability() {
        assert!(list(&[1.0]).is_portable());
        let method = Value::function(Callable::Text {
            method: TextMethod::Length,
            receiver: "a".into(),
        });
        assert!(method.is_portable());
        let function = Value::function(Callable::Function {
            definition: NodeId(0),
            closure: EvaluationId::ROOT,
        });
        assert!(!function.is_portable());
    }
}

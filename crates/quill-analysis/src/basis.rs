//! Built-in definitions every program can see.
//!
//! The basis is deliberately small: the text methods, the native
//! conversions, and the stream definitions. Each entry is a closed enum so
//! the evaluator can dispatch on it with an exhaustive `match`.

use quill_types::Unit;
use serde::{Deserialize, Serialize};

use crate::ty::Type;

// ══════════════════════════════════════════════════════════════════════════════
// Signatures
// ══════════════════════════════════════════════════════════════════════════════

/// One declared input of a built-in.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSignature {
    pub name: &'static str,
    pub ty: Type,
    /// Optional inputs default to `ø`.
    pub optional: bool,
}

/// The shape of a built-in callable.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: &'static str,
    pub inputs: Vec<InputSignature>,
    pub output: Type,
}

impl Signature {
    pub fn function_type(&self) -> Type {
        Type::function(
            self.inputs.iter().map(|i| i.ty.clone()).collect(),
            self.output.clone(),
        )
    }

    pub fn required_inputs(&self) -> usize {
        self.inputs.iter().filter(|i| !i.optional).count()
    }
}

fn input(name: &'static str, ty: Type) -> InputSignature {
    InputSignature {
        name,
        ty,
        optional: false,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Text methods
// ══════════════════════════════════════════════════════════════════════════════

/// Methods on text values, reached through property access (`'hi'.length()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextMethod {
    Length,
    Repeat,
    Equals,
    NotEquals,
    Segment,
    Combine,
    Has,
}

impl TextMethod {
    pub const ALL: [TextMethod; 7] = [
        TextMethod::Length,
        TextMethod::Repeat,
        TextMethod::Equals,
        TextMethod::NotEquals,
        TextMethod::Segment,
        TextMethod::Combine,
        TextMethod::Has,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TextMethod::Length => "length",
            TextMethod::Repeat => "repeat",
            TextMethod::Equals => "equals",
            TextMethod::NotEquals => "notequals",
            TextMethod::Segment => "segment",
            TextMethod::Combine => "combine",
            TextMethod::Has => "has",
        }
    }

    pub fn from_name(name: &str) -> Option<TextMethod> {
        TextMethod::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn signature(self) -> Signature {
        let (inputs, output) = match self {
            TextMethod::Length => (vec![], Type::number()),
            TextMethod::Repeat => (vec![input("count", Type::number())], Type::Text),
            TextMethod::Equals | TextMethod::NotEquals => {
                (vec![input("text", Type::Text)], Type::Boolean)
            }
            TextMethod::Segment => (
                vec![input("delimiter", Type::Text)],
                Type::list(Type::Text),
            ),
            TextMethod::Combine => (vec![input("text", Type::Text)], Type::Text),
            TextMethod::Has => (vec![input("text", Type::Text)], Type::Boolean),
        };
        Signature {
            name: self.name(),
            inputs,
            output,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Conversions
// ══════════════════════════════════════════════════════════════════════════════

/// Conversions every program has without declaring them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeConversion {
    /// `'abc' → ['']`: one text per character.
    TextToList,
    /// `'12' → #`: parses, or `ø` when the text is not a number.
    TextToNumber,
    NumberToText,
    BooleanToText,
    ListToSet,
    SetToList,
}

impl NativeConversion {
    /// The native conversion from `input` to `output`, if there is one.
    pub fn find(input: &Type, output: &Type) -> Option<NativeConversion> {
        match (input, output) {
            (Type::Text, Type::List(item)) if item.accepts(&Type::Text) => {
                Some(NativeConversion::TextToList)
            }
            (Type::Text, Type::Measurement(_)) => Some(NativeConversion::TextToNumber),
            (Type::Measurement(_), Type::Text) => Some(NativeConversion::NumberToText),
            (Type::Boolean, Type::Text) => Some(NativeConversion::BooleanToText),
            (Type::List(from), Type::Set(to)) if to.accepts(from) => {
                Some(NativeConversion::ListToSet)
            }
            (Type::Set(from), Type::List(to)) if to.accepts(from) => {
                Some(NativeConversion::SetToList)
            }
            _ => None,
        }
    }

    /// The type this conversion produces from `input`.
    pub fn output_type(self, input: &Type) -> Type {
        match (self, input) {
            (NativeConversion::TextToList, _) => Type::list(Type::Text),
            (NativeConversion::TextToNumber, _) => Type::union(Type::number(), Type::None),
            (NativeConversion::NumberToText | NativeConversion::BooleanToText, _) => Type::Text,
            (NativeConversion::ListToSet, Type::List(item)) => Type::Set(item.clone()),
            (NativeConversion::SetToList, Type::Set(item)) => Type::List(item.clone()),
            (NativeConversion::ListToSet, _) => Type::set(Type::Never),
            (NativeConversion::SetToList, _) => Type::list(Type::Never),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Streams
// ══════════════════════════════════════════════════════════════════════════════

/// Stream definitions, referenced by name and evaluated to create a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Milliseconds elapsed since the first tick.
    Time,
}

impl StreamKind {
    pub const ALL: [StreamKind; 1] = [StreamKind::Time];

    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Time => "Time",
        }
    }

    pub fn from_name(name: &str) -> Option<StreamKind> {
        StreamKind::ALL.into_iter().find(|s| s.name() == name)
    }

    /// The type of each value the stream produces.
    pub fn value_type(self) -> Type {
        match self {
            StreamKind::Time => Type::measurement(Unit::of("ms")),
        }
    }

    /// Calling the definition creates the stream.
    pub fn signature(self) -> Signature {
        match self {
            StreamKind::Time => Signature {
                name: self.name(),
                inputs: vec![InputSignature {
                    name: "frequency",
                    ty: Type::union(Type::measurement(Unit::of("ms")), Type::None),
                    optional: true,
                }],
                output: Type::stream(self.value_type()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_method_lookup() {
        for method in TextMethod::ALL {
            assert_eq!(TextMethod::from_name(method.name()), Some(method));
        }
        assert_eq!(TextMethod::from_name("shout"), None);
        assert_eq!(TextMethod::Segment.signature().output, Type::list(Type::Text));
    }

    #[test]
    fn test_native_conversion_lookup() {
        assert_eq!(
            NativeConversion::find(&Type::Text, &Type::list(Type::Text)),
            Some(NativeConversion::TextToList)
        );
        assert_eq!(
            NativeConversion::find(&Type::number(), &Type::Text),
            Some(NativeConversion::NumberToText)
        );
        assert_eq!(NativeConversion::find(&Type::Boolean, &Type::number()), None);
        let list = Type::list(Type::number());
        let set = NativeConversion::ListToSet.output_type(&list);
        assert_eq!(set, Type::set(Type::number()));
    }

    #[test]
    fn test_time_signature() {
        let sig = StreamKind::Time.signature();
        assert_eq!(sig.required_inputs(), 0);
        assert_eq!(sig.output, Type::stream(Type::measurement(Unit::of("ms"))));
        assert_eq!(StreamKind::from_name("Time"), Some(StreamKind::Time));
    }
}

//! Error types for the Quill evaluator.
//!
//! Two separate families live here. [`EvalError`] is a host-facing Rust
//! error: the engine could not do what the host asked. [`Exception`] is a
//! language-level failure: it is carried as a [`Value`] and becomes the
//! program's result.

use std::fmt;

use quill_analysis::{Conflicts, Type};
use quill_types::NodeId;
use thiserror::Error;

use crate::stream::StreamId;
use crate::value::Value;

/// Host-facing evaluator errors.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The program has conflicts that prevent evaluation.
    #[error("program has {} fatal conflict(s)", .0.fatal().count())]
    Conflicts(Conflicts),

    #[error("no stream with id {0}")]
    UnknownStream(StreamId),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for evaluator operations.
pub type EvalResult<T> = Result<T, EvalError>;

// ══════════════════════════════════════════════════════════════════════════════
// Runtime exceptions
// ══════════════════════════════════════════════════════════════════════════════

/// What went wrong at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ExceptionKind {
    NameNotFound { name: String },
    /// An operation was given a value of the wrong type.
    TypeMismatch { expected: Type, received: Value },
    ConversionNotFound { input: Type, output: Type },
    StepLimit,
    CallDepthLimit,
    EvaluationLimit { function: String },
    /// A name was used that has no value, such as a missing input.
    ValueRequired { name: String },
    /// A text operation would produce more than `limit` bytes.
    TextTooLong { limit: usize },
    Unparsable,
}

impl ExceptionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NameNotFound { .. } => "NameNotFound",
            Self::TypeMismatch { .. } => "TypeMismatch",
            Self::ConversionNotFound { .. } => "ConversionNotFound",
            Self::StepLimit => "StepLimit",
            Self::CallDepthLimit => "CallDepthLimit",
            Self::EvaluationLimit { .. } => "EvaluationLimit",
            Self::ValueRequired { .. } => "ValueRequired",
            Self::TextTooLong { .. } => "TextTooLong",
            Self::Unparsable => "Unparsable",
        }
    }

    pub fn type_mismatch(expected: Type, received: &Value) -> Self {
        Self::TypeMismatch {
            expected,
            received: received.clone(),
        }
    }

    /// Attach the node that raised it.
    pub fn at(self, node: NodeId) -> Exception {
        Exception { kind: self, node }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameNotFound { name } => write!(f, "no value named {name}"),
            Self::TypeMismatch { expected, received } => {
                write!(f, "expected {expected}, received {received}")
            }
            Self::ConversionNotFound { input, output } => {
                write!(f, "no conversion from {input} to {output}")
            }
            Self::StepLimit => write!(f, "step limit reached"),
            Self::CallDepthLimit => write!(f, "call depth limit reached"),
            Self::EvaluationLimit { function } => {
                write!(f, "{function} evaluated too many times")
            }
            Self::ValueRequired { name } => write!(f, "{name} needs a value"),
            Self::TextTooLong { limit } => write!(f, "text longer than {limit} bytes"),
            Self::Unparsable => write!(f, "unparsable"),
        }
    }
}

/// A runtime failure raised by a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub node: NodeId,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{} at {}: {}", self.kind.name(), self.node, self.kind)
    }
}

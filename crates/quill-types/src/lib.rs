//! Shared types for the Quill execution and analysis core.
//!
//! This crate defines the arena-indexed syntax tree consumed by the analyzer
//! and the evaluator, source spans, and measurement units. The tree is the
//! parser's output contract: it is built once and never mutated.

mod error;
mod span;
mod unit;
pub mod ast;

pub use ast::{NodeId, Tree, TreeBuilder};
pub use error::TreeError;
pub use span::Span;
pub use unit::Unit;

//! Quill static analysis.
//!
//! ```text
//! Tree → Context ─┬─ type_of / narrowing ─→ Type
//!                 ├─ resolve / callee / conversion
//!                 └─ checker ─→ Conflicts
//! ```
//!
//! Everything here is computed from the syntax tree alone. The evaluator asks
//! the same [`Context`] for name resolution and conversion lookup at runtime.

pub mod basis;
pub mod checker;
pub mod conflict;
pub mod context;
pub mod env;
pub mod narrowing;
pub mod ty;
pub mod type_set;

pub use conflict::{Conflict, ConflictKind, Conflicts, Explanation, Translator};
pub use context::{Callee, Context, Conversion, ConversionMatch};
pub use env::Definition;
pub use ty::{Type, UnknownReason};
pub use type_set::TypeSet;

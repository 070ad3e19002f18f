//! Quill step evaluator.
//!
//! ```text
//! Tree ─→ Context (checked) ─→ Compiled steps ─→ Machine ─┬─→ Value
//!                                                         ├─ StepLog (reversible)
//!                                  Streams ── tick ─→ react ─→ ReactionNotice
//! ```
//!
//! Programs run as flat sequences of [`Step`]s, one at a time, so a host can
//! pause, step backwards and inspect any intermediate state. Streams feed
//! new values between passes; each [`Evaluator::react`] re-evaluates the
//! program and reuses whatever did not depend on what changed.
//!
//! Runtime failures are values: a failed pass ends with a
//! [`Value::Exception`]. Only setup problems (fatal conflicts, invalid
//! configuration) are Rust errors.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod evaluator;
mod machine;
pub mod native;
pub mod step;
pub mod stream;
pub mod structure;
pub mod value;

pub use config::EngineConfig;
pub use error::{EvalError, EvalResult, Exception, ExceptionKind};
pub use evaluation::{Evaluation, EvaluationId, EvaluationKind};
pub use evaluator::{Evaluator, Reaction, ReactionNotice, Status};
pub use step::{Step, StepLog};
pub use stream::{Producer, Stream, StreamId, Streams, TimeProducer};
pub use structure::Structure;
pub use value::{Callable, Value};

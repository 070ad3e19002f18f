//! Binding frames.
//!
//! Every program run, function call, structure construction and conversion
//! gets an [`Evaluation`]: the names bound while it runs, the definition it
//! instantiates, and a link to the evaluation it closes over. Evaluations
//! live in a per-pass arena and refer to each other by [`EvaluationId`], so a
//! closure can see names its defining block binds after the closure was made.

use std::collections::BTreeMap;
use std::rc::Rc;

use quill_types::NodeId;

use crate::value::Value;

/// Index of an evaluation in its pass's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvaluationId(u32);

impl EvaluationId {
    /// The program's own evaluation, always the first one created.
    pub const ROOT: EvaluationId = EvaluationId(0);
}

/// What an evaluation instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationKind {
    Program,
    Function,
    Structure,
    Conversion,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    kind: EvaluationKind,
    definition: NodeId,
    closure: Option<EvaluationId>,
    /// The value `This` refers to inside a conversion.
    subject: Option<Value>,
    bindings: BTreeMap<String, Value>,
}

impl Evaluation {
    pub fn new(kind: EvaluationKind, definition: NodeId, closure: Option<EvaluationId>) -> Self {
        Self {
            kind,
            definition,
            closure,
            subject: None,
            bindings: BTreeMap::new(),
        }
    }

    pub fn with_subject(mut self, subject: Value) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn kind(&self) -> EvaluationKind {
        self.kind
    }

    pub fn definition(&self) -> NodeId {
        self.definition
    }

    pub fn closure(&self) -> Option<EvaluationId> {
        self.closure
    }

    pub fn subject(&self) -> Option<&Value> {
        self.subject.as_ref()
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> &BTreeMap<String, Value> {
        &self.bindings
    }
}

/// Evaluations per shared chunk of the arena.
const CHUNK: usize = 64;

/// The arena of one pass's evaluations.
///
/// Entries live in reference-counted chunks and are copied on write, so a
/// clone shares everything with the original until one of them binds a
/// name. Cloning costs one pointer per chunk, however long the pass.
#[derive(Debug, Clone, Default)]
pub struct Evaluations {
    chunks: Vec<Rc<Vec<Rc<Evaluation>>>>,
    len: usize,
}

impl Evaluations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, evaluation: Evaluation) -> EvaluationId {
        let id = EvaluationId(self.len as u32);
        if self.len % CHUNK == 0 {
            self.chunks.push(Rc::new(Vec::with_capacity(CHUNK)));
        }
        let last = self.chunks.len() - 1;
        Rc::make_mut(&mut self.chunks[last]).push(Rc::new(evaluation));
        self.len += 1;
        id
    }

    pub fn get(&self, id: EvaluationId) -> &Evaluation {
        let i = id.0 as usize;
        &self.chunks[i / CHUNK][i % CHUNK]
    }

    pub fn get_mut(&mut self, id: EvaluationId) -> &mut Evaluation {
        let i = id.0 as usize;
        let chunk = Rc::make_mut(&mut self.chunks[i / CHUNK]);
        Rc::make_mut(&mut chunk[i % CHUNK])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Look `name` up in `from` and then along its closure chain.
    pub fn resolve(&self, from: EvaluationId, name: &str) -> Option<&Value> {
        self.chain(from).find_map(|id| self.get(id).get(name))
    }

    /// `from` followed by every evaluation it closes over, nearest first.
    pub fn chain(&self, from: EvaluationId) -> impl Iterator<Item = EvaluationId> + '_ {
        std::iter::successors(Some(from), |id| self.get(*id).closure())
    }
}

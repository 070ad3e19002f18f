//! The frame stack and the execution of single steps.
//!
//! A [`Machine`] is the complete state of one evaluation pass at one step
//! index. Its evaluation arena is shared copy-on-write, so a clone costs
//! little more than the live frames, and the evaluator keeps periodic
//! copies and rebuilds any earlier index by re-running steps from the
//! nearest one. Re-running is exact because everything a step reads is
//! either in the machine or fixed for the pass (the [`Pass`] inputs, stream
//! values tagged with the pass they became visible in).

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use quill_analysis::basis::StreamKind;
use quill_analysis::{env, Context, Conversion, Type, UnknownReason};
use quill_types::ast::{NodeKind, TypeAnnotation};
use quill_types::NodeId;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::config::EngineConfig;
use crate::error::{Exception, ExceptionKind};
use crate::evaluation::{Evaluation, EvaluationId, EvaluationKind, Evaluations};
use crate::native;
use crate::step::{Compiled, Shape, Step};
use crate::stream::{StreamId, Streams};
use crate::structure::Structure;
use crate::value::{Callable, Value};

/// Where a pass is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// No step taken yet.
    Ready,
    Running,
    /// Finished with an exception as its result.
    Exception,
    Completed,
}

/// Inputs to one pass, fixed while it runs.
#[derive(Debug, Default)]
pub(crate) struct Pass {
    pub number: usize,
    /// Streams whose new values caused this pass.
    pub changed: BTreeSet<StreamId>,
    /// The nodes that created `changed`.
    pub changed_creators: BTreeSet<NodeId>,
    /// Root-level values from the previous pass.
    pub memo: HashMap<NodeId, Value>,
    /// Reaction values from the previous pass.
    pub reactions: HashMap<NodeId, Value>,
}

/// Everything outside the machine a step may touch.
pub(crate) struct Runtime<'a> {
    pub context: &'a Context,
    pub config: &'a EngineConfig,
    pub compiled: &'a mut Compiled,
    pub streams: &'a mut Streams,
    pub pass: &'a Pass,
    /// Set while re-running already logged steps: no log events.
    pub quiet: bool,
}

#[derive(Debug, Clone)]
struct Frame {
    kind: EvaluationKind,
    steps: Rc<[Step]>,
    pc: usize,
    values: Vec<Value>,
    evaluation: EvaluationId,
}

type StepResult = Result<(), Exception>;

#[derive(Debug, Clone)]
pub(crate) struct Machine {
    frames: Vec<Frame>,
    evaluations: Evaluations,
    status: Status,
    result: Option<Value>,
    /// Steps executed so far.
    index: usize,
    call_counts: HashMap<NodeId, usize>,
    /// Reaction values produced this pass.
    reactions: HashMap<NodeId, Value>,
    /// Root-level values produced this pass that a later pass may reuse.
    memo: HashMap<NodeId, Value>,
}

impl Machine {
    pub fn new(context: &Context, compiled: &mut Compiled) -> Self {
        let tree = context.tree();
        let mut evaluations = Evaluations::new();
        let root = evaluations.push(Evaluation::new(EvaluationKind::Program, tree.root(), None));
        let frame = Frame {
            kind: EvaluationKind::Program,
            steps: compiled.steps(tree, Shape::Node(tree.root())),
            pc: 0,
            values: Vec::new(),
            evaluation: root,
        };
        Self {
            frames: vec![frame],
            evaluations,
            status: Status::Ready,
            result: None,
            index: 0,
            call_counts: HashMap::new(),
            reactions: HashMap::new(),
            memo: HashMap::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, Status::Completed | Status::Exception)
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// The top of the active frame's value stack, or the result once done.
    pub fn current_value(&self) -> Option<&Value> {
        match self.frames.last() {
            Some(frame) => frame.values.last(),
            None => self.result.as_ref(),
        }
    }

    /// The step the next call to [`step`](Self::step) executes.
    pub fn next_step(&self) -> Option<Step> {
        let frame = self.frames.last()?;
        frame.steps.get(frame.pc).copied()
    }

    pub fn reactions(&self) -> &HashMap<NodeId, Value> {
        &self.reactions
    }

    pub fn memo(&self) -> &HashMap<NodeId, Value> {
        &self.memo
    }

    // ── Stepping ─────────────────────────────────────────────────────────

    /// Execute one step. `None` once the pass is finished.
    pub fn step(&mut self, rt: &mut Runtime<'_>) -> Option<Step> {
        let step = self.next_step()?;
        self.index += 1;
        self.status = Status::Running;

        if self.index > rt.config.max_steps {
            if !rt.quiet {
                warn!(limit = rt.config.max_steps, "step limit reached");
            }
            self.fail(ExceptionKind::StepLimit.at(step.node()), rt);
            return Some(step);
        }

        if let Some(frame) = self.frames.last_mut() {
            frame.pc += 1;
        }
        match self.execute(step, rt) {
            Ok(()) => self.complete_frames(rt),
            Err(exception) => self.fail(exception, rt),
        }
        Some(step)
    }

    fn execute(&mut self, step: Step, rt: &mut Runtime<'_>) -> StepResult {
        match step {
            Step::Start(node) => {
                self.start(node, rt);
                Ok(())
            }
            Step::Check(node) => {
                self.check(node, rt);
                Ok(())
            }
            Step::Jump { count, .. } => {
                self.skip(count);
                Ok(())
            }
            Step::JumpIf { node, count, when } => {
                let condition = self.pop_value(rt);
                let Some(value) = condition.as_boolean() else {
                    return Err(ExceptionKind::type_mismatch(Type::Boolean, &condition).at(node));
                };
                if value == when {
                    self.skip(count);
                    // A reaction whose condition failed keeps its last value.
                    if matches!(rt.context.tree().kind(node), NodeKind::Reaction { .. }) {
                        let previous = rt.pass.reactions.get(&node).cloned().unwrap_or(Value::None);
                        self.push(previous);
                    }
                }
                Ok(())
            }
            Step::Finish(node) => {
                self.finish(node, rt)?;
                if self.in_root_frame() {
                    self.remember(node, rt);
                }
                Ok(())
            }
        }
    }

    fn frame(&self) -> &Frame {
        // The stack is never empty while a step runs.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    fn in_root_frame(&self) -> bool {
        self.frames.len() == 1
    }

    fn skip(&mut self, count: usize) {
        self.frame_mut().pc += count;
    }

    fn push(&mut self, value: Value) {
        self.frame_mut().values.push(value);
    }

    /// Pop a value as stored: stream handles stay handles.
    fn pop(&mut self) -> Value {
        self.frame_mut().values.pop().unwrap_or(Value::None)
    }

    /// Pop a value, reading a stream handle as the stream's current value.
    fn pop_value(&mut self, rt: &Runtime<'_>) -> Value {
        let value = self.pop();
        resolve_stream(value, rt)
    }

    fn pop_values(&mut self, count: usize, rt: &Runtime<'_>) -> Vec<Value> {
        let mut values: Vec<Value> = (0..count).map(|_| self.pop_value(rt)).collect();
        values.reverse();
        values
    }

    fn current_evaluation(&self) -> EvaluationId {
        self.frame().evaluation
    }

    fn fail(&mut self, exception: Exception, rt: &Runtime<'_>) {
        if !rt.quiet {
            let span = rt.context.tree().span(exception.node);
            trace!(%exception, %span, depth = self.frames.len(), "exception");
        }
        self.frames.clear();
        self.status = Status::Exception;
        self.result = Some(Value::exception(exception));
    }

    /// Pop every frame whose steps are exhausted, handing each result to its
    /// caller.
    fn complete_frames(&mut self, rt: &Runtime<'_>) {
        while let Some(frame) = self.frames.last() {
            if frame.pc < frame.steps.len() {
                break;
            }
            let Some(frame) = self.frames.pop() else {
                break;
            };
            let result = match frame.kind {
                EvaluationKind::Structure => Value::Structure(Rc::new(Structure::from_evaluation(
                    rt.context.tree(),
                    &self.evaluations,
                    frame.evaluation,
                ))),
                _ => resolve_stream(frame.values.last().cloned().unwrap_or(Value::None), rt),
            };
            match self.frames.last_mut() {
                Some(caller) => {
                    caller.values.push(result);
                    // The root frame's last step is the Finish that made the call.
                    if self.in_root_frame() {
                        if let Some(Step::Finish(node)) = self.frame().pc.checked_sub(1).and_then(|i| self.frame().steps.get(i).copied()) {
                            self.remember(node, rt);
                        }
                    }
                }
                None => {
                    self.status = Status::Completed;
                    self.result = Some(result);
                }
            }
        }
    }

    // ── Memoization ──────────────────────────────────────────────────────

    /// Record the value `node` just produced in the root frame, if a later
    /// pass may reuse it.
    fn remember(&mut self, node: NodeId, rt: &Runtime<'_>) {
        if !rt.context.is_memoizable(node) {
            return;
        }
        if let Some(value) = self.frame().values.last() {
            if value.is_portable() {
                let value = value.clone();
                self.memo.insert(node, value);
            }
        }
    }

    /// The previous pass's value for `node`, if none of its dependencies
    /// changed since. Reactions and `∆` tests count as changed on every
    /// pass, since their values depend on which streams caused it.
    fn memoized(&self, node: NodeId, rt: &Runtime<'_>) -> Option<Value> {
        let value = rt.pass.memo.get(&node)?;
        if !rt.context.is_memoizable(node) {
            return None;
        }
        let context = rt.context;
        let tree = context.tree();
        let stale = context.stream_dependencies(node).iter().any(|dependency| {
            rt.pass.changed_creators.contains(dependency)
                || matches!(
                    tree.kind(*dependency),
                    NodeKind::Reaction { .. } | NodeKind::Changed { .. }
                )
        });
        (!stale).then(|| value.clone())
    }

    fn start(&mut self, node: NodeId, rt: &mut Runtime<'_>) {
        if !self.in_root_frame() {
            return;
        }
        if let Some(value) = self.memoized(node, rt) {
            // Skip straight past this node's Finish.
            let remaining = rt.compiled.len(rt.context.tree(), node) - 1;
            self.skip(remaining);
            self.memo.insert(node, value.clone());
            self.push(value);
        }
    }

    // ── Reactions ────────────────────────────────────────────────────────

    fn check(&mut self, node: NodeId, rt: &mut Runtime<'_>) {
        let Some(previous) = rt.pass.reactions.get(&node).cloned() else {
            // First run: fall through to the initial value.
            return;
        };
        let context = rt.context;
        let tree = context.tree();
        if let Some(NodeKind::Bind { name, .. }) = tree.parent(node).map(|p| tree.kind(p)) {
            let evaluation = self.current_evaluation();
            self.evaluations.get_mut(evaluation).bind(name, previous);
        }
        if let NodeKind::Reaction { initial, .. } = tree.kind(node) {
            let initial_len = rt.compiled.len(tree, *initial);
            self.skip(initial_len + 1);
        }
    }

    // ── Finish ───────────────────────────────────────────────────────────

    fn finish(&mut self, node: NodeId, rt: &mut Runtime<'_>) -> StepResult {
        let context = rt.context;
        let tree = context.tree();
        match tree.kind(node) {
            NodeKind::Program { .. } | NodeKind::Conditional { .. } => {}
            NodeKind::Block { statements } => {
                let mut values = self.pop_values(statements.len(), rt);
                self.push(values.pop().unwrap_or(Value::None));
            }
            NodeKind::Bind { name, value, .. } => {
                if value.is_none() {
                    return Err(ExceptionKind::ValueRequired { name: name.clone() }.at(node));
                }
                let value = self.pop();
                let evaluation = self.current_evaluation();
                self.evaluations.get_mut(evaluation).bind(name, value.clone());
                self.push(value);
            }
            NodeKind::FunctionDefinition { name, .. } => {
                let closure = self.current_evaluation();
                let value = Value::function(Callable::Function {
                    definition: node,
                    closure,
                });
                self.evaluations.get_mut(closure).bind(name, value.clone());
                self.push(value);
            }
            NodeKind::StructureDefinition { name, .. } => {
                let closure = self.current_evaluation();
                let value = Value::function(Callable::Structure {
                    definition: node,
                    closure,
                });
                self.evaluations.get_mut(closure).bind(name, value.clone());
                self.push(value);
            }
            NodeKind::ConversionDefinition { .. } => {
                let closure = self.current_evaluation();
                self.push(Value::function(Callable::Conversion {
                    definition: node,
                    closure,
                }));
            }
            NodeKind::BooleanLiteral(b) => self.push(Value::Boolean(*b)),
            NodeKind::NumberLiteral { value, unit } => {
                self.push(Value::measurement(*value, unit.clone()))
            }
            NodeKind::TextLiteral(text) => self.push(Value::text(text.as_str())),
            NodeKind::NoneLiteral => self.push(Value::None),
            NodeKind::ListLiteral(items) => {
                let values = self.pop_values(items.len(), rt);
                self.push(Value::List(values));
            }
            NodeKind::SetLiteral(items) => {
                let values = self.pop_values(items.len(), rt);
                self.push(Value::set(values));
            }
            NodeKind::MapLiteral(pairs) => {
                let mut values = self.pop_values(pairs.len() * 2, rt).into_iter();
                let mut entries = Vec::with_capacity(pairs.len());
                while let (Some(key), Some(value)) = (values.next(), values.next()) {
                    entries.push((key, value));
                }
                self.push(Value::map(entries));
            }
            NodeKind::Reference(name) => {
                let value = self.lookup(name).ok_or_else(|| {
                    ExceptionKind::NameNotFound { name: name.clone() }.at(node)
                })?;
                self.push(value);
            }
            NodeKind::PropertyAccess { name, .. } => {
                let subject = self.pop_value(rt);
                let value = self.property(&subject, name, rt).map_err(|kind| kind.at(node))?;
                self.push(value);
            }
            NodeKind::ListAccess { .. } => {
                let index = self.pop_value(rt);
                let list = self.pop_value(rt);
                let value = list_item(&list, &index).map_err(|kind| kind.at(node))?;
                self.push(value);
            }
            NodeKind::This => {
                let value = self.this().ok_or_else(|| {
                    ExceptionKind::NameNotFound { name: "this".into() }.at(node)
                })?;
                let value = match value {
                    This::Value(value) => value,
                    This::Structure(id) => Value::Structure(Rc::new(Structure::from_evaluation(
                        tree,
                        &self.evaluations,
                        id,
                    ))),
                };
                self.push(value);
            }
            NodeKind::BinaryOperation { operator, .. } => {
                let right = self.pop_value(rt);
                let left = self.pop_value(rt);
                let value = native::binary(*operator, &left, &right).map_err(|kind| kind.at(node))?;
                self.push(value);
            }
            NodeKind::UnaryOperation { operator, .. } => {
                let operand = self.pop_value(rt);
                let value = native::unary(*operator, &operand).map_err(|kind| kind.at(node))?;
                self.push(value);
            }
            NodeKind::Is { annotation, .. } => {
                let value = self.pop_value(rt);
                let tested = rt.context.annotation_type(annotation, node);
                self.push(Value::Boolean(tested.accepts(&value.type_of())));
            }
            NodeKind::Evaluate { inputs, .. } => {
                let arguments = self.pop_values(inputs.len(), rt);
                let function = self.pop_value(rt);
                self.call(node, function, arguments, rt)?;
            }
            NodeKind::Convert { annotation, .. } => {
                let value = self.pop_value(rt);
                self.convert(node, value, annotation, rt)?;
            }
            NodeKind::Previous { .. } => {
                let count = self.pop_value(rt);
                let stream = self.pop();
                let id = stream_handle(&stream).map_err(|kind| kind.at(node))?;
                let Some(count) = count.as_number() else {
                    return Err(ExceptionKind::type_mismatch(Type::Measurement(None), &count).at(node));
                };
                let back = if count.is_finite() && count > 0.0 {
                    count.floor() as usize
                } else {
                    0
                };
                let value = rt
                    .streams
                    .get(id)
                    .and_then(|s| s.previous_at(back, rt.pass.number))
                    .cloned()
                    .unwrap_or(Value::None);
                self.push(value);
            }
            NodeKind::Changed { .. } => {
                let stream = self.pop();
                let id = stream_handle(&stream).map_err(|kind| kind.at(node))?;
                self.push(Value::Boolean(rt.pass.changed.contains(&id)));
            }
            NodeKind::Reaction { .. } => {
                let value = self.pop_value(rt);
                self.reactions.insert(node, value.clone());
                self.push(value);
            }
            NodeKind::Unparsable { .. } => return Err(ExceptionKind::Unparsable.at(node)),
        }
        Ok(())
    }

    // ── Names ────────────────────────────────────────────────────────────

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.evaluations.resolve(self.current_evaluation(), name) {
            return Some(value.clone());
        }
        StreamKind::from_name(name).map(|kind| Value::function(Callable::Stream(kind)))
    }

    fn this(&self) -> Option<This> {
        self.evaluations
            .chain(self.current_evaluation())
            .find_map(|id| {
                let evaluation = self.evaluations.get(id);
                if let Some(subject) = evaluation.subject() {
                    return Some(This::Value(subject.clone()));
                }
                (evaluation.kind() == EvaluationKind::Structure).then_some(This::Structure(id))
            })
    }

    fn property(&self, subject: &Value, name: &str, rt: &Runtime<'_>) -> Result<Value, ExceptionKind> {
        let context = rt.context;
        let tree = context.tree();
        let not_found = || ExceptionKind::NameNotFound {
            name: name.to_string(),
        };
        match subject {
            Value::Structure(structure) => {
                if let Some(value) = structure.resolve(name) {
                    return Ok(value.clone());
                }
                let member = structure.member(tree, name).ok_or_else(not_found)?;
                let closure = structure.evaluation();
                match tree.kind(member) {
                    NodeKind::FunctionDefinition { .. } => Ok(Value::function(Callable::Function {
                        definition: member,
                        closure,
                    })),
                    NodeKind::StructureDefinition { .. } => Ok(Value::function(Callable::Structure {
                        definition: member,
                        closure,
                    })),
                    _ => Err(ExceptionKind::ValueRequired {
                        name: name.to_string(),
                    }),
                }
            }
            _ => match quill_analysis::basis::TextMethod::from_name(name) {
                Some(method) => native::text_property(method, subject),
                None => Err(not_found()),
            },
        }
    }

    // ── Calls ────────────────────────────────────────────────────────────

    fn call(&mut self, node: NodeId, function: Value, arguments: Vec<Value>, rt: &mut Runtime<'_>) -> StepResult {
        let Value::Function(callable) = &function else {
            let expected = Type::function(Vec::new(), Type::Unknown(UnknownReason::Unsupported));
            return Err(ExceptionKind::type_mismatch(expected, &function).at(node));
        };
        match callable.as_ref() {
            Callable::Function {
                definition,
                closure,
            } => self.enter(EvaluationKind::Function, node, *definition, *closure, arguments, rt),
            Callable::Structure {
                definition,
                closure,
            } => self.enter(EvaluationKind::Structure, node, *definition, *closure, arguments, rt),
            Callable::Conversion {
                definition,
                closure,
            } => {
                let subject = arguments.into_iter().next().ok_or_else(|| {
                    ExceptionKind::ValueRequired { name: "input".into() }.at(node)
                })?;
                self.enter_conversion(node, *definition, *closure, subject, rt)
            }
            Callable::Text { method, receiver } => {
                let value = native::text_method(*method, receiver, &arguments).map_err(|kind| kind.at(node))?;
                self.push(value);
                Ok(())
            }
            Callable::Stream(kind) => {
                let id = match rt.streams.created_by(node) {
                    // Re-run steps leave the live producer's configuration alone.
                    Some(id) if rt.quiet => id,
                    _ => rt
                        .streams
                        .create_or_reuse(*kind, node, &arguments, rt.pass.number, rt.config),
                };
                self.push(Value::Stream(id));
                Ok(())
            }
        }
    }

    /// Count an evaluation of `definition` and check the stack limits.
    fn admit(&mut self, node: NodeId, definition: NodeId, name: &str, rt: &Runtime<'_>) -> StepResult {
        if self.frames.len() >= rt.config.max_call_depth {
            if !rt.quiet {
                warn!(limit = rt.config.max_call_depth, function = name, "call depth limit reached");
            }
            return Err(ExceptionKind::CallDepthLimit.at(node));
        }
        let count = self.call_counts.entry(definition).or_insert(0);
        *count += 1;
        if *count > rt.config.max_evaluations_per_function {
            if !rt.quiet {
                warn!(limit = rt.config.max_evaluations_per_function, function = name, "evaluation limit reached");
            }
            return Err(ExceptionKind::EvaluationLimit {
                function: name.to_string(),
            }
            .at(node));
        }
        Ok(())
    }

    /// Push a frame evaluating a function or structure definition.
    fn enter(
        &mut self,
        kind: EvaluationKind,
        node: NodeId,
        definition: NodeId,
        closure: EvaluationId,
        arguments: Vec<Value>,
        rt: &mut Runtime<'_>,
    ) -> StepResult {
        let context = rt.context;
        let tree = context.tree();
        let (name, inputs, body) = match tree.kind(definition) {
            NodeKind::FunctionDefinition {
                name, inputs, body, ..
            }
            | NodeKind::StructureDefinition {
                name, inputs, body, ..
            } => (name.as_str(), inputs.as_slice(), *body),
            _ => return Err(ExceptionKind::Unparsable.at(node)),
        };
        if kind == EvaluationKind::Function && body.is_none() {
            return Err(ExceptionKind::ValueRequired {
                name: name.to_string(),
            }
            .at(node));
        }
        self.admit(node, definition, name, rt)?;

        let mut evaluation = Evaluation::new(kind, definition, Some(closure));
        let provided = arguments.len().min(inputs.len());
        for (input, argument) in inputs.iter().zip(arguments) {
            if let Some(input_name) = tree.kind(*input).defined_name() {
                evaluation.bind(input_name, argument);
            }
        }
        for input in &inputs[provided..] {
            if let NodeKind::Bind {
                name, value: None, ..
            } = tree.kind(*input)
            {
                return Err(ExceptionKind::ValueRequired { name: name.clone() }.at(node));
            }
        }

        let evaluation = self.evaluations.push(evaluation);
        let steps = rt.compiled.steps(tree, Shape::Call { definition, provided });
        if !rt.quiet {
            trace!(function = name, depth = self.frames.len() + 1, "enter");
        }
        self.frames.push(Frame {
            kind,
            steps,
            pc: 0,
            values: Vec::new(),
            evaluation,
        });
        Ok(())
    }

    fn enter_conversion(
        &mut self,
        node: NodeId,
        definition: NodeId,
        closure: EvaluationId,
        subject: Value,
        rt: &mut Runtime<'_>,
    ) -> StepResult {
        self.admit(node, definition, "→", rt)?;
        let evaluation = self.evaluations.push(
            Evaluation::new(EvaluationKind::Conversion, definition, Some(closure)).with_subject(subject),
        );
        let steps = rt.compiled.steps(
            rt.context.tree(),
            Shape::Call {
                definition,
                provided: 0,
            },
        );
        self.frames.push(Frame {
            kind: EvaluationKind::Conversion,
            steps,
            pc: 0,
            values: Vec::new(),
            evaluation,
        });
        Ok(())
    }

    fn convert(&mut self, node: NodeId, value: Value, annotation: &TypeAnnotation, rt: &mut Runtime<'_>) -> StepResult {
        let target = rt.context.annotation_type(annotation, node);
        let input = value.type_of();
        if target.accepts(&input) {
            self.push(value);
            return Ok(());
        }
        let Some(found) = rt.context.conversion(&input, &target, node) else {
            return Err(ExceptionKind::ConversionNotFound {
                input,
                output: target,
            }
            .at(node));
        };
        match found.conversion {
            Conversion::Native(conversion) => {
                let converted = native::convert(conversion, &value).map_err(|kind| kind.at(node))?;
                self.push(converted);
                Ok(())
            }
            Conversion::Defined(definition) => {
                let context = rt.context;
                let tree = context.tree();
                let declared_in_structure = tree
                    .parent(definition)
                    .is_some_and(|block| env::is_structure_body(tree, block));
                let closure = match &value {
                    Value::Structure(structure) if declared_in_structure => structure.evaluation(),
                    _ => EvaluationId::ROOT,
                };
                self.enter_conversion(node, definition, closure, value, rt)
            }
        }
    }
}

/// What `This` refers to.
enum This {
    Value(Value),
    /// The structure under construction (or constructed) by this evaluation.
    Structure(EvaluationId),
}

fn resolve_stream(value: Value, rt: &Runtime<'_>) -> Value {
    match value {
        Value::Stream(id) => rt
            .streams
            .get(id)
            .and_then(|stream| stream.latest_at(rt.pass.number))
            .cloned()
            .unwrap_or(Value::None),
        other => other,
    }
}

fn stream_handle(value: &Value) -> Result<StreamId, ExceptionKind> {
    value.as_stream().ok_or_else(|| {
        ExceptionKind::type_mismatch(Type::stream(Type::Unknown(UnknownReason::Unsupported)), value)
    })
}

/// Lists are indexed from 1. Out-of-range and fractional indices give `ø`.
fn list_item(list: &Value, index: &Value) -> Result<Value, ExceptionKind> {
    let Value::List(items) = list else {
        return Err(ExceptionKind::type_mismatch(
            Type::list(Type::Unknown(UnknownReason::Unsupported)),
            list,
        ));
    };
    let Some(index) = index.as_number() else {
        return Err(ExceptionKind::type_mismatch(Type::Measurement(None), index));
    };
    if index.fract() != 0.0 || index < 1.0 {
        return Ok(Value::None);
    }
    Ok(items.get(index as usize - 1).cloned().unwrap_or(Value::None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_items_are_one_based() {
        let list = Value::List(vec![Value::text("a"), Value::text("b")]);
        assert_eq!(list_item(&list, &Value::number(1.0)), Ok(Value::text("a")));
        assert_eq!(list_item(&list, &Value::number(2.0)), Ok(Value::text("b")));
        assert_eq!(list_item(&list, &Value::number(3.0)), Ok(Value::None));
        assert_eq!(list_item(&list, &Value::number(0.0)), Ok(Value::None));
        assert_eq!(list_item(&list, &Value::number(1.5)), Ok(Value::None));
    }

    #[test]
    fn list_item_on_non_list_is_type_exception() {
        let err = list_item(&Value::text("ab"), &Value::number(1.0)).unwrap_err();
        assert!(matches!(err, ExceptionKind::TypeMismatch { .. }));
    }

    #[test]
    fn stream_handle_requires_stream() {
        assert_eq!(stream_handle(&Value::Stream(StreamId(2))), Ok(StreamId(2)));
        assert!(stream_handle(&Value::number(1.0)).is_err());
    }
}

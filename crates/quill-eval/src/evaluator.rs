//! The host-facing evaluator.
//!
//! An [`Evaluator`] owns a checked program, its streams and the log of every
//! step taken since the program started, across all of its passes. Hosts
//! drive it three ways:
//!
//! - stepping: [`step`](Evaluator::step), [`step_back`](Evaluator::step_back)
//!   and [`step_to`](Evaluator::step_to) move a cursor through the log;
//! - running: [`evaluate`](Evaluator::evaluate) runs the newest pass to its
//!   end;
//! - reacting: [`tick`](Evaluator::tick) polls the streams, then
//!   [`react`](Evaluator::react) starts a new pass reading their new values.
//!
//! Each pass records where its steps start in the log and the inputs it
//! read. Moving the cursor restores the nearest stored machine of the pass
//! holding the target and re-runs the logged steps from there without
//! logging. Every step is deterministic given the pass inputs, so a re-run
//! reaches exactly the state the original run did.

use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

use quill_analysis::{Conflicts, Context};
use quill_types::Tree;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{EvalError, EvalResult};
use crate::machine::{Machine, Pass, Runtime};
use crate::step::{Compiled, Step, StepLog};
use crate::stream::{Stream, StreamId, Streams};
use crate::value::Value;

pub use crate::machine::Status;

/// One finished reaction pass.
#[derive(Debug, Clone)]
pub struct Reaction {
    pub pass: usize,
    /// The streams whose new values caused it.
    pub changed: Vec<StreamId>,
    pub result: Value,
    /// Log index of the pass's first step.
    pub start: usize,
    /// Steps the pass took.
    pub steps: usize,
}

/// What subscribers hear about each reaction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionNotice {
    pub pass: usize,
    pub changed: Vec<StreamId>,
    pub steps: usize,
    /// The pass result, displayed.
    pub result: String,
}

impl From<&Reaction> for ReactionNotice {
    fn from(reaction: &Reaction) -> Self {
        Self {
            pass: reaction.pass,
            changed: reaction.changed.clone(),
            steps: reaction.steps,
            result: reaction.result.to_string(),
        }
    }
}

/// Where a pass sits in the log and what it read.
#[derive(Debug)]
struct PassRecord {
    /// Log index of the pass's first step.
    start: usize,
    inputs: Pass,
    /// `snapshots[k]` is the machine after `k * snapshot_interval` of the
    /// pass's steps.
    snapshots: Vec<Machine>,
}

pub struct Evaluator {
    context: Context,
    config: EngineConfig,
    conflicts: Conflicts,
    compiled: Compiled,
    streams: Streams,
    /// Every pass since the program started, oldest first. Never empty.
    passes: Vec<PassRecord>,
    /// The pass `machine` belongs to.
    cursor: usize,
    /// State at the cursor.
    machine: Machine,
    log: StepLog,
    /// The newest pass's result, once it has one.
    result: Option<Value>,
    history: Vec<Reaction>,
    /// Streams that changed since the newest pass started.
    pending: BTreeSet<StreamId>,
    observers: Vec<Sender<ReactionNotice>>,
}

impl Evaluator {
    /// Check `tree` and prepare its first pass with the default configuration.
    pub fn new(tree: Tree) -> EvalResult<Self> {
        Self::with_config(tree, EngineConfig::default())
    }

    /// Check `tree` and prepare its first pass. Fails if the program has any
    /// fatal conflict.
    pub fn with_config(tree: Tree, config: EngineConfig) -> EvalResult<Self> {
        config.validate()?;
        let context = Context::new(Rc::new(tree));
        let conflicts = context.conflicts();
        if conflicts.has_fatal() {
            info!(
                fatal = conflicts.fatal().count(),
                total = conflicts.len(),
                "program rejected"
            );
            return Err(EvalError::Conflicts(conflicts));
        }
        let mut compiled = Compiled::new();
        let machine = Machine::new(&context, &mut compiled);
        info!(
            nodes = context.tree().len(),
            conflicts = conflicts.len(),
            "evaluator ready"
        );
        let first = PassRecord {
            start: 0,
            inputs: Pass::default(),
            snapshots: vec![machine.clone()],
        };
        Ok(Self {
            context,
            config,
            conflicts,
            compiled,
            streams: Streams::new(),
            passes: vec![first],
            cursor: 0,
            machine,
            log: StepLog::new(),
            result: None,
            history: Vec::new(),
            pending: BTreeSet::new(),
            observers: Vec::new(),
        })
    }

    // ══════════════════════════════════════════════════════════════════════
    // Stepping
    // ══════════════════════════════════════════════════════════════════════

    fn newest(&self) -> usize {
        self.passes.len() - 1
    }

    /// Log index of the cursor.
    fn position(&self) -> usize {
        self.passes[self.cursor].start + self.machine.index()
    }

    fn advance(&mut self, quiet: bool) -> Option<Step> {
        let mut runtime = Runtime {
            context: &self.context,
            config: &self.config,
            compiled: &mut self.compiled,
            streams: &mut self.streams,
            pass: &self.passes[self.cursor].inputs,
            quiet,
        };
        self.machine.step(&mut runtime)
    }

    /// Take the next step. Below the end of the log this re-runs a logged
    /// step, crossing into the next pass when the current one is finished;
    /// at the end it runs and logs a new one. `None` once the newest pass
    /// is finished.
    pub fn step(&mut self) -> Option<Step> {
        if self.machine.is_finished() && self.cursor < self.newest() {
            self.seek(self.cursor + 1, 0);
        }
        if self.position() < self.log.len() {
            return self.advance(true);
        }
        let step = self.advance(false)?;
        self.log.push(step);
        let index = self.machine.index();
        let interval = self.config.snapshot_interval;
        let record = &mut self.passes[self.cursor];
        if index % interval == 0 && index / interval == record.snapshots.len() {
            record.snapshots.push(self.machine.clone());
        }
        if self.machine.is_finished() {
            self.finish_pass();
        }
        Some(step)
    }

    /// Move the cursor `count` steps back, stopping at the start of the log.
    pub fn step_back(&mut self, count: usize) {
        let target = self.position().saturating_sub(count);
        self.step_to(target);
    }

    /// Move the cursor to just after `index` logged steps. Targets past the
    /// end of the log stop at its end. An index where one pass ends and the
    /// next begins shows the finished earlier pass.
    pub fn step_to(&mut self, index: usize) {
        let target = index.min(self.log.len());
        let slot = self
            .passes
            .iter()
            .rposition(|record| record.start < target)
            .unwrap_or(0);
        let local = target - self.passes[slot].start;
        self.seek(slot, local);
    }

    /// Put the cursor `local` steps into pass `slot`.
    fn seek(&mut self, slot: usize, local: usize) {
        let interval = self.config.snapshot_interval;
        let nearest = local / interval;
        let restore = slot != self.cursor
            || local < self.machine.index()
            || nearest * interval > self.machine.index();
        if restore {
            self.machine = match self.passes[slot].snapshots.get(nearest) {
                Some(snapshot) => snapshot.clone(),
                None => Machine::new(&self.context, &mut self.compiled),
            };
            self.cursor = slot;
        }
        while self.machine.index() < local {
            if self.advance(true).is_none() {
                break;
            }
        }
    }

    /// Run the newest pass to its end and return its result.
    pub fn evaluate(&mut self) -> Value {
        if self.position() < self.log.len() {
            self.step_to(self.log.len());
        }
        while self.step().is_some() {}
        self.result.clone().unwrap_or(Value::None)
    }

    fn finish_pass(&mut self) {
        let result = self.machine.result().cloned().unwrap_or(Value::None);
        debug!(
            pass = self.passes[self.cursor].inputs.number,
            steps = self.machine.index(),
            status = ?self.machine.status(),
            %result,
            "pass finished"
        );
        self.result = Some(result);
    }

    /// Append a pass reading `inputs` and put the cursor at its start.
    fn begin_pass(&mut self, inputs: Pass) {
        self.machine = Machine::new(&self.context, &mut self.compiled);
        self.passes.push(PassRecord {
            start: self.log.len(),
            inputs,
            snapshots: vec![self.machine.clone()],
        });
        self.cursor = self.newest();
        self.result = None;
    }

    // ══════════════════════════════════════════════════════════════════════
    // Streams and reactions
    // ══════════════════════════════════════════════════════════════════════

    /// Poll every stream at host time `now` (milliseconds). New values are
    /// read by the next reaction pass. Returns the streams that changed.
    pub fn tick(&mut self, now: f64) -> Vec<StreamId> {
        let next_pass = self.pass_number() + 1;
        let changed = self.streams.tick(now, next_pass);
        self.pending.extend(changed.iter().copied());
        changed
    }

    /// True if some stream changed since the newest pass started.
    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Finish the newest pass, then evaluate the program again reading the
    /// streams' newest values. Root-level values that depend on no changed
    /// stream are reused from the finished pass. The new pass's steps are
    /// appended to the log after the old ones.
    pub fn react(&mut self) -> Value {
        self.evaluate();

        let changed = std::mem::take(&mut self.pending);
        let changed_creators = changed
            .iter()
            .filter_map(|id| self.streams.get(*id))
            .map(Stream::creator)
            .collect();
        let inputs = Pass {
            number: self.pass_number() + 1,
            changed_creators,
            memo: self.machine.memo().clone(),
            reactions: self.machine.reactions().clone(),
            changed,
        };
        debug!(
            pass = inputs.number,
            changed = inputs.changed.len(),
            reusable = inputs.memo.len(),
            "reaction started"
        );
        self.begin_pass(inputs);
        let result = self.evaluate();

        let record = &self.passes[self.newest()];
        let reaction = Reaction {
            pass: record.inputs.number,
            changed: record.inputs.changed.iter().copied().collect(),
            result: result.clone(),
            start: record.start,
            steps: self.log.len() - record.start,
        };
        let notice = ReactionNotice::from(&reaction);
        self.observers.retain(|observer| observer.send(notice.clone()).is_ok());
        self.history.push(reaction);
        result
    }

    /// Drop every stream, the step log, the reaction history and all
    /// reusable values, then evaluate the program from scratch.
    pub fn restart(&mut self) -> Value {
        self.streams.clear();
        self.history.clear();
        self.pending.clear();
        self.log.clear();
        self.passes.clear();
        self.begin_pass(Pass::default());
        info!("evaluator restarted");
        self.evaluate()
    }

    /// A channel that receives a [`ReactionNotice`] after every reaction
    /// pass. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> Receiver<ReactionNotice> {
        let (sender, receiver) = mpsc::channel();
        self.observers.push(sender);
        receiver
    }

    // ══════════════════════════════════════════════════════════════════════
    // Queries
    // ══════════════════════════════════════════════════════════════════════

    /// Frames on the stack at the cursor. Zero once the pass is finished.
    pub fn frame_depth(&self) -> usize {
        self.machine.frame_depth()
    }

    /// The value on top of the active frame at the cursor.
    pub fn current_value(&self) -> Option<&Value> {
        self.machine.current_value()
    }

    /// Log index of the cursor: steps taken to reach it, over every pass.
    pub fn step_index(&self) -> usize {
        self.position()
    }

    /// Steps logged since the program started.
    pub fn step_count(&self) -> usize {
        self.log.len()
    }

    /// The step the cursor would take next.
    pub fn current_step(&self) -> Option<Step> {
        self.machine.next_step()
    }

    pub fn status(&self) -> Status {
        self.machine.status()
    }

    /// The newest pass's result, once that pass has finished.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Number of the newest pass: 0 for the first, one more per reaction.
    pub fn pass_number(&self) -> usize {
        self.passes[self.newest()].inputs.number
    }

    /// Number of the pass the cursor is in.
    pub fn cursor_pass(&self) -> usize {
        self.passes[self.cursor].inputs.number
    }

    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    pub fn stream(&self, id: StreamId) -> EvalResult<&Stream> {
        self.streams.get(id).ok_or(EvalError::UnknownStream(id))
    }

    /// The newest value of `id` the pass at the cursor reads.
    pub fn stream_value(&self, id: StreamId) -> EvalResult<Option<&Value>> {
        Ok(self.stream(id)?.latest_at(self.cursor_pass()))
    }

    /// Every conflict found in the program, fatal or not.
    pub fn conflicts(&self) -> &Conflicts {
        &self.conflicts
    }

    pub fn log(&self) -> &StepLog {
        &self.log
    }

    pub fn history(&self) -> &[Reaction] {
        &self.history
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("pass", &self.pass_number())
            .field("cursor_pass", &self.cursor_pass())
            .field("status", &self.machine.status())
            .field("step_index", &self.position())
            .field("step_count", &self.log.len())
            .field("streams", &self.streams.len())
            .finish()
    }
}

//! Streams: external, time-ordered sources of values.
//!
//! A [`Stream`] is created the first time the `Evaluate` node that calls a
//! stream definition runs, and is found again by that node on every later
//! pass. Its [`Producer`] appends values between steps, never during one.
//! Each appended value records the pass from which it is visible, so
//! replaying a pass always reads the values that pass originally read.

use std::collections::HashMap;
use std::fmt;

use quill_analysis::basis::StreamKind;
use quill_types::{NodeId, Unit};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::value::Value;

/// Identity of a stream within one evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}", self.0)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Producers
// ══════════════════════════════════════════════════════════════════════════════

/// The source of a stream's values.
pub trait Producer: fmt::Debug {
    fn name(&self) -> &'static str;

    /// The value the stream holds before anything is appended.
    fn initial(&self) -> Value;

    /// Apply the inputs of the `Evaluate` node that created the stream.
    /// Called on creation and again whenever that node runs.
    fn configure(&mut self, inputs: &[Value]);

    /// Poll at host time `now` (milliseconds). Returns a value to append,
    /// if the producer has one.
    fn tick(&mut self, now: f64) -> Option<Value>;
}

/// Milliseconds since the first tick, at most once per `frequency`.
#[derive(Debug, Clone)]
pub struct TimeProducer {
    frequency: f64,
    default_frequency: f64,
    first: Option<f64>,
    last: Option<f64>,
}

impl TimeProducer {
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            default_frequency: frequency,
            first: None,
            last: None,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    fn make(ms: f64) -> Value {
        Value::measurement(ms, Unit::of("ms"))
    }
}

impl Producer for TimeProducer {
    fn name(&self) -> &'static str {
        StreamKind::Time.name()
    }

    fn initial(&self) -> Value {
        Self::make(0.0)
    }

    fn configure(&mut self, inputs: &[Value]) {
        self.frequency = inputs
            .first()
            .and_then(Value::as_number)
            .unwrap_or(self.default_frequency);
    }

    fn tick(&mut self, now: f64) -> Option<Value> {
        let first = *self.first.get_or_insert(now);
        let due = match self.last {
            None => true,
            Some(last) => now - last >= self.frequency,
        };
        if !due {
            return None;
        }
        self.last = Some(now);
        Some(Self::make((now - first).round()))
    }
}

/// A producer for a basis stream definition.
pub fn producer_for(kind: StreamKind, config: &EngineConfig) -> Box<dyn Producer> {
    match kind {
        StreamKind::Time => Box::new(TimeProducer::new(config.time_frequency_ms)),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Streams
// ══════════════════════════════════════════════════════════════════════════════

/// One appended value.
#[derive(Debug, Clone)]
pub struct StreamValue {
    pub value: Value,
    /// The first pass that may read it.
    pub pass: usize,
}

#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    kind: StreamKind,
    creator: NodeId,
    producer: Box<dyn Producer>,
    values: Vec<StreamValue>,
}

impl Stream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// The `Evaluate` node that created this stream.
    pub fn creator(&self) -> NodeId {
        self.creator
    }

    pub fn name(&self) -> &'static str {
        self.producer.name()
    }

    pub fn producer(&self) -> &dyn Producer {
        self.producer.as_ref()
    }

    /// Every value ever appended, oldest first.
    pub fn values(&self) -> &[StreamValue] {
        &self.values
    }

    /// The newest value, regardless of pass.
    pub fn latest(&self) -> Option<&Value> {
        self.values.last().map(|v| &v.value)
    }

    fn visible(&self, pass: usize) -> impl DoubleEndedIterator<Item = &Value> + '_ {
        self.values
            .iter()
            .filter(move |v| v.pass <= pass)
            .map(|v| &v.value)
    }

    /// The newest value `pass` may read.
    pub fn latest_at(&self, pass: usize) -> Option<&Value> {
        self.visible(pass).next_back()
    }

    /// The value `count` appends before the newest one `pass` may read,
    /// clamped to the oldest.
    pub fn previous_at(&self, count: usize, pass: usize) -> Option<&Value> {
        let visible: Vec<&Value> = self.visible(pass).collect();
        let last = visible.len().checked_sub(1)?;
        Some(visible[last.saturating_sub(count)])
    }
}

/// Every stream an evaluator owns.
#[derive(Debug, Default)]
pub struct Streams {
    streams: Vec<Stream>,
    by_creator: HashMap<NodeId, StreamId>,
}

impl Streams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(id.0 as usize)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stream> {
        self.streams.iter()
    }

    pub fn created_by(&self, creator: NodeId) -> Option<StreamId> {
        self.by_creator.get(&creator).copied()
    }

    /// The stream `creator` made on an earlier run, reconfigured with
    /// `inputs`, or a new one visible from `pass`.
    pub fn create_or_reuse(
        &mut self,
        kind: StreamKind,
        creator: NodeId,
        inputs: &[Value],
        pass: usize,
        config: &EngineConfig,
    ) -> StreamId {
        if let Some(id) = self.created_by(creator) {
            self.streams[id.0 as usize].producer.configure(inputs);
            return id;
        }
        let id = StreamId(self.streams.len() as u32);
        let mut producer = producer_for(kind, config);
        producer.configure(inputs);
        let initial = producer.initial();
        debug!(stream = %id, kind = kind.name(), %creator, "stream created");
        self.streams.push(Stream {
            id,
            kind,
            creator,
            producer,
            values: vec![StreamValue {
                value: initial,
                pass,
            }],
        });
        self.by_creator.insert(creator, id);
        id
    }

    /// Poll every producer. Values appended now become visible from
    /// `next_pass`. Returns the streams that changed.
    pub fn tick(&mut self, now: f64, next_pass: usize) -> Vec<StreamId> {
        let mut changed = Vec::new();
        for stream in &mut self.streams {
            if let Some(value) = stream.producer.tick(now) {
                debug!(stream = %stream.id, %value, "stream appended");
                stream.values.push(StreamValue {
                    value,
                    pass: next_pass,
                });
                changed.push(stream.id);
            }
        }
        changed
    }

    pub fn clear(&mut self) {
        self.streams.clear();
        self.by_creator.clear();
    }
}

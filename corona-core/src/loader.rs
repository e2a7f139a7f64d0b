//! Pre-init loader replay
//!
//! Host code may start calling the collector before it exists. Those calls are
//! recorded on a [`LoaderStub`] as `[method, ...args]` JSON arrays:
//!
//! ```json
//! [["init", {"url": "https://collector.example/ingest"}], ["log", "click", {"target": "button"}]]
//! ```
//!
//! [`CollectorSlot`] is the host-owned binding. Installing the real collector
//! takes the stub out of the slot, puts the collector in, and then replays the
//! recorded calls in order. Dispatch goes through the closed [`Command`] table;
//! anything it does not recognise is skipped.

use std::sync::Arc;

use serde_json::Value;

use crate::collector::Collector;
use crate::config::CollectorConfig;
use crate::event::Attributes;

/// One recorded call: method name followed by its arguments
pub type RecordedCall = Vec<Value>;

/// Operations a recorded call can name
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Init(CollectorConfig),
    Log {
        name: String,
        attributes: Option<Attributes>,
    },
    Flush,
    Identify(String),
}

impl Command {
    /// Decode a recorded call, or `None` for unknown methods and bad arguments.
    pub fn parse(call: &[Value]) -> Option<Self> {
        let (method, args) = call.split_first()?;

        match method.as_str()? {
            "init" => serde_json::from_value(args.first()?.clone())
                .ok()
                .map(Command::Init),
            "log" => {
                let name = args.first()?.as_str()?.to_string();
                let attributes = args.get(1).and_then(Value::as_object).cloned();
                Some(Command::Log { name, attributes })
            }
            "flush" => Some(Command::Flush),
            "identify" => Some(Command::Identify(args.first()?.as_str()?.to_string())),
            _ => None,
        }
    }
}

/// Stand-in that records calls until the collector is installed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoaderStub {
    calls: Vec<RecordedCall>,
}

impl LoaderStub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `method(args...)`
    pub fn record(&mut self, method: &str, args: impl IntoIterator<Item = Value>) {
        let mut call = vec![Value::from(method)];
        call.extend(args);
        self.calls.push(call);
    }

    /// Accepts either a bare array of calls or an object with a `q` array.
    ///
    /// Entries that are not arrays are dropped.
    pub fn from_json(value: Value) -> Self {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut fields) => match fields.remove("q") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        let calls = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Array(call) => Some(call),
                _ => None,
            })
            .collect();
        Self { calls }
    }

    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn into_calls(self) -> Vec<RecordedCall> {
        self.calls
    }
}

/// Host-owned binding: a recording stub until the collector is installed.
#[derive(Default)]
pub enum CollectorSlot {
    #[default]
    Empty,
    Pending(LoaderStub),
    Ready(Arc<Collector>),
}

impl CollectorSlot {
    /// Slot that already holds recorded calls
    pub fn with_stub(stub: LoaderStub) -> Self {
        Self::Pending(stub)
    }

    /// Record a call, or run it right away once the collector is installed.
    pub async fn call(&mut self, call: RecordedCall) {
        match self {
            Self::Ready(collector) => collector.process_queue(vec![call]).await,
            Self::Pending(stub) => stub.calls.push(call),
            Self::Empty => *self = Self::Pending(LoaderStub { calls: vec![call] }),
        }
    }

    /// Install the real collector and replay anything recorded before it.
    pub async fn install(&mut self, collector: Arc<Collector>) -> Arc<Collector> {
        let previous = std::mem::replace(self, Self::Ready(collector.clone()));

        if let Self::Pending(stub) = previous {
            collector.process_queue(stub.into_calls()).await;
        }
        collector
    }

    /// The installed collector, if any
    pub fn collector(&self) -> Option<Arc<Collector>> {
        match self {
            Self::Ready(collector) => Some(collector.clone()),
            _ => None,
        }
    }
}

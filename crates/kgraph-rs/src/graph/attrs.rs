//! Typed node attributes.
//!
//! Handles are stored as tagged values so a stream can never be read back as an
//! event. They are lowered to plain `u64` only when exported to the runtime.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::{EventHandle, StreamId};
use crate::graph::{GraphError, NodeId};

/// Attribute keys understood by the downstream queue/event dispatcher.
pub mod keys {
    pub const STREAM_ID: &str = "stream_id";
    pub const RECORD_EVENT: &str = "record_event";
    pub const WAIT_EVENT: &str = "wait_event";
    pub const RECORD_EVENT_STREAM: &str = "record_event_stream";
    pub const WAIT_EVENT_STREAM: &str = "wait_event_stream";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrValue {
    Stream(StreamId),
    Event(EventHandle),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl AttrValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttrValue::Stream(_) => "stream",
            AttrValue::Event(_) => "event",
            AttrValue::Int(_) => "int",
            AttrValue::Bool(_) => "bool",
            AttrValue::Str(_) => "string",
        }
    }

    /// Returns the raw handle value for stream and event attributes.
    pub fn to_wire(&self) -> Option<u64> {
        match self {
            AttrValue::Stream(stream) => Some(stream.raw()),
            AttrValue::Event(event) => Some(event.raw()),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Stream(stream) => write!(f, "{stream}"),
            AttrValue::Event(event) => write!(f, "{event}"),
            AttrValue::Int(value) => write!(f, "{value}"),
            AttrValue::Bool(value) => write!(f, "{value}"),
            AttrValue::Str(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<StreamId> for AttrValue {
    fn from(value: StreamId) -> Self {
        AttrValue::Stream(value)
    }
}

impl From<EventHandle> for AttrValue {
    fn from(value: EventHandle) -> Self {
        AttrValue::Event(value)
    }
}

/// String-keyed attribute map with deterministic iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attrs(BTreeMap<String, AttrValue>);

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub fn set(&mut self, key: &str, value: impl Into<AttrValue>) -> Option<AttrValue> {
        self.0.insert(key.to_string(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads a stream handle, failing when the key is absent or holds another kind.
    pub fn stream(&self, node: NodeId, key: &str) -> Result<StreamId, GraphError> {
        match self.require(node, key)? {
            AttrValue::Stream(stream) => Ok(*stream),
            other => Err(mismatch(node, key, "stream", other)),
        }
    }

    /// Reads an event handle, failing when the key is absent or holds another kind.
    pub fn event(&self, node: NodeId, key: &str) -> Result<EventHandle, GraphError> {
        match self.require(node, key)? {
            AttrValue::Event(event) => Ok(*event),
            other => Err(mismatch(node, key, "event", other)),
        }
    }

    fn require(&self, node: NodeId, key: &str) -> Result<&AttrValue, GraphError> {
        self.0.get(key).ok_or_else(|| GraphError::MissingAttr {
            node,
            key: key.to_string(),
        })
    }
}

fn mismatch(node: NodeId, key: &str, expected: &'static str, found: &AttrValue) -> GraphError {
    GraphError::AttrTypeMismatch {
        node,
        key: key.to_string(),
        expected,
        found: found.kind_name(),
    }
}

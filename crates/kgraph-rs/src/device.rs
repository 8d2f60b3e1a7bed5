//! Hardware stream/event abstraction consumed by the scheduling passes.
//!
//! Devices hand out opaque handles; the passes only store them as node
//! attributes and never interpret their numeric value.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque handle to a hardware execution queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl StreamId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream({})", self.0)
    }
}

/// Opaque handle to a one-shot cross-stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventHandle(pub u64);

impl EventHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event({})", self.0)
    }
}

/// Device error surfaced when a stream or event cannot be allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("creating stream on device `{device}` failed: {message}")]
    StreamCreation { device: String, message: String },
    #[error("creating event on device `{device}` failed: {message}")]
    EventCreation { device: String, message: String },
}

impl DeviceError {
    pub fn stream_creation(device: impl Into<String>, message: impl Into<String>) -> Self {
        DeviceError::StreamCreation {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn event_creation(device: impl Into<String>, message: impl Into<String>) -> Self {
        DeviceError::EventCreation {
            device: device.into(),
            message: message.into(),
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Stream and event allocator backing a compilation session.
pub trait StreamDevice: Send + Sync {
    /// Returns a human-readable device identifier (e.g. `"sim"`, `"cuda:0"`).
    fn device_name(&self) -> &str;

    /// Returns the pre-existing compute stream every kernel defaults to.
    fn default_stream(&self) -> StreamId;

    /// Allocates a new stream distinct from every stream handed out before.
    fn create_stream(&self) -> DeviceResult<StreamId>;

    /// Allocates a fresh event with timing disabled.
    fn create_event(&self) -> DeviceResult<EventHandle>;
}

use std::sync::atomic::{AtomicU64, Ordering};

use kgraph_rs::device::{DeviceError, DeviceResult, EventHandle, StreamDevice, StreamId};
use tracing::trace;

const DEFAULT_STREAM: StreamId = StreamId(0);

/// Deterministic in-process device.
///
/// The default stream is `stream(0)`; created streams count up from 1 and
/// events from 0. Optional budgets make creation fail once exhausted.
#[derive(Debug)]
pub struct SimDevice {
    next_stream: AtomicU64,
    next_event: AtomicU64,
    stream_budget: Option<u64>,
    event_budget: Option<u64>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            next_stream: AtomicU64::new(1),
            next_event: AtomicU64::new(0),
            stream_budget: None,
            event_budget: None,
        }
    }

    /// Allows at most `budget` streams to be created.
    pub fn with_stream_budget(mut self, budget: u64) -> Self {
        self.stream_budget = Some(budget);
        self
    }

    /// Allows at most `budget` events to be created.
    pub fn with_event_budget(mut self, budget: u64) -> Self {
        self.event_budget = Some(budget);
        self
    }

    pub fn streams_created(&self) -> u64 {
        self.next_stream.load(Ordering::Relaxed) - 1
    }

    pub fn events_created(&self) -> u64 {
        self.next_event.load(Ordering::Relaxed)
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDevice for SimDevice {
    fn device_name(&self) -> &str {
        "sim"
    }

    fn default_stream(&self) -> StreamId {
        DEFAULT_STREAM
    }

    fn create_stream(&self) -> DeviceResult<StreamId> {
        let created = self.streams_created();
        if self.stream_budget.is_some_and(|budget| created >= budget) {
            return Err(DeviceError::stream_creation(
                self.device_name(),
                format!("stream budget of {created} exhausted"),
            ));
        }
        let stream = StreamId(self.next_stream.fetch_add(1, Ordering::Relaxed));
        trace!(%stream, "created stream");
        Ok(stream)
    }

    fn create_event(&self) -> DeviceResult<EventHandle> {
        let created = self.events_created();
        if self.event_budget.is_some_and(|budget| created >= budget) {
            return Err(DeviceError::event_creation(
                self.device_name(),
                format!("event budget of {created} exhausted"),
            ));
        }
        let event = EventHandle(self.next_event.fetch_add(1, Ordering::Relaxed));
        trace!(%event, "created event");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_count_up_deterministically() {
        let device = SimDevice::new();
        assert_eq!(device.default_stream(), StreamId(0));
        assert_eq!(device.create_stream().unwrap(), StreamId(1));
        assert_eq!(device.create_stream().unwrap(), StreamId(2));
        assert_eq!(device.create_event().unwrap(), EventHandle(0));
        assert_eq!(device.streams_created(), 2);
        assert_eq!(device.events_created(), 1);
    }

    #[test]
    fn budgets_reject_further_allocations() {
        let device = SimDevice::new().with_stream_budget(1).with_event_budget(0);
        assert!(device.create_stream().is_ok());
        assert!(matches!(
            device.create_stream(),
            Err(DeviceError::StreamCreation { .. })
        ));
        let err = device.create_event().unwrap_err();
        assert_eq!(
            err.to_string(),
            "creating event on device `sim` failed: event budget of 0 exhausted"
        );
        assert_eq!(device.streams_created(), 1);
    }
}

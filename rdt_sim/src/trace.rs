//! In-memory packet trace.

use rdt_env::{NodeId, TransportEvent, VirtualTime};
use serde::Serialize;

/// What happened at a node or on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// Reported by the endpoint itself
    Endpoint(TransportEvent),

    /// Datagram reached its destination
    Delivered { from: NodeId, len: usize },

    /// Datagram lost on the wire
    Dropped { to: NodeId, len: usize },

    /// Channel refused the datagram
    Refused { to: NodeId, len: usize },

    /// Datagram arrived at a node that is not running
    Discarded { from: NodeId, len: usize },

    Started,
    Stopped,
}

/// One trace line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TraceRecord {
    /// Virtual time in seconds
    pub time: f64,

    pub node: NodeId,

    pub event: TraceEvent,
}

impl TraceRecord {
    pub fn new(time: VirtualTime, node: NodeId, event: TraceEvent) -> Self {
        Self {
            time: time.as_secs_f64(),
            node,
            event,
        }
    }
}

/// Bounded-by-run collection of trace records; a no-op when disabled.
#[derive(Debug, Clone, Default)]
pub struct PacketTrace {
    records: Option<Vec<TraceRecord>>,
}

impl PacketTrace {
    pub fn new(enabled: bool) -> Self {
        Self {
            records: enabled.then(Vec::new),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.records.is_some()
    }

    pub fn record(&mut self, time: VirtualTime, node: NodeId, event: TraceEvent) {
        if let Some(records) = self.records.as_mut() {
            records.push(TraceRecord::new(time, node, event));
        }
    }

    pub fn records(&self) -> &[TraceRecord] {
        self.records.as_deref().unwrap_or(&[])
    }
}

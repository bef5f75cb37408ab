//! Test doubles shared by the endpoint unit tests.

use rdt_env::{
    EventHandle, NodeId, Packet, RdtError, ReliableHeader, TimerKind, TransportContext,
    TransportEvent, VirtualTime,
};

/// A `TransportContext` that records everything and delivers nothing.
pub struct MockContext {
    pub local: NodeId,
    pub now: VirtualTime,

    /// Datagrams accepted by `transmit`, in order
    pub sent: Vec<(NodeId, Vec<u8>)>,

    /// Every timer ever armed, with the absolute time it would fire
    pub timers: Vec<(EventHandle, TimerKind)>,

    pub cancelled: Vec<EventHandle>,
    pub events: Vec<TransportEvent>,

    /// Refuse this many upcoming transmissions
    pub refuse_next: u32,

    next_id: u64,
}

impl MockContext {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            now: VirtualTime::ZERO,
            sent: Vec::new(),
            timers: Vec::new(),
            cancelled: Vec::new(),
            events: Vec::new(),
            refuse_next: 0,
            next_id: 0,
        }
    }

    /// Headers of every accepted datagram.
    pub fn sent_headers(&self) -> Vec<ReliableHeader> {
        self.sent
            .iter()
            .filter_map(|(_, dg)| Packet::decode(dg).ok())
            .map(|p| p.header)
            .collect()
    }

    /// Timers armed and neither cancelled nor taken yet.
    pub fn armed(&self) -> Vec<(EventHandle, TimerKind)> {
        self.timers
            .iter()
            .filter(|(h, _)| !self.cancelled.contains(h))
            .copied()
            .collect()
    }

    /// Removes and returns the earliest armed timer, advancing the clock to it.
    pub fn fire_next(&mut self) -> Option<TimerKind> {
        let (handle, timer) = self.armed().into_iter().min_by_key(|(h, _)| *h)?;
        self.cancelled.push(handle);
        self.now = handle.fire_time();
        Some(timer)
    }
}

impl TransportContext for MockContext {
    fn now(&self) -> VirtualTime {
        self.now
    }

    fn local_id(&self) -> NodeId {
        self.local
    }

    fn transmit(&mut self, to: NodeId, datagram: Vec<u8>) -> Result<bool, RdtError> {
        if self.refuse_next > 0 {
            self.refuse_next -= 1;
            return Err(RdtError::transmission("mock refusal"));
        }
        self.sent.push((to, datagram));
        Ok(true)
    }

    fn set_timer(&mut self, delay: VirtualTime, timer: TimerKind) -> EventHandle {
        let handle = EventHandle::new(self.now + delay, self.next_id);
        self.next_id += 1;
        self.timers.push((handle, timer));
        handle
    }

    fn cancel_timer(&mut self, handle: EventHandle) {
        if !self.cancelled.contains(&handle) {
            self.cancelled.push(handle);
        }
    }

    fn emit(&mut self, event: TransportEvent) {
        self.events.push(event);
    }
}

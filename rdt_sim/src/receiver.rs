//! Receiving endpoint: in-order acceptance and per-packet ACKs.
//!
//! The receiver only ever accepts `expected_seq`. Anything else (early, late
//! or duplicate) is logged and discarded without an ACK. There is no reorder
//! buffer and no cumulative ACK, so a lost ACK leaves the sender
//! retransmitting a packet the receiver has already consumed.

use rdt_env::{Endpoint, NodeId, Packet, RdtError, TimerKind, TransportContext, TransportEvent};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Sequence tracking for one receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverState {
    /// Next sequence number that will be accepted
    pub expected_seq: u32,

    /// Packets accepted in order
    pub packets_accepted: u64,

    /// Payload bytes of accepted packets
    pub bytes_received: u64,
}

/// Diagnostics beyond the accepted-packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverCounters {
    /// ACKs handed to the channel
    pub acks_sent: u64,

    /// ACKs the channel refused
    pub ack_failures: u64,

    /// Data packets ahead of `expected_seq`
    pub early: u64,

    /// Data packets behind `expected_seq` (duplicates of accepted data)
    pub late: u64,

    /// ACK-flagged datagrams, which a receiver ignores
    pub ignored_acks: u64,

    /// Datagrams too short for a header
    pub malformed: u64,
}

impl ReceiverCounters {
    /// Sequence mismatches of either kind.
    pub fn out_of_order(&self) -> u64 {
        self.early + self.late
    }
}

/// Stop-and-wait receiver.
#[derive(Debug, Default)]
pub struct ReliableReceiver {
    state: ReceiverState,
    counters: ReceiverCounters,
}

impl ReliableReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn counters(&self) -> ReceiverCounters {
        self.counters
    }

    /// Next sequence number the receiver will accept.
    pub fn expected_seq(&self) -> u32 {
        self.state.expected_seq
    }

    /// Handles one decoded packet from `from`.
    pub fn on_packet_received(
        &mut self,
        ctx: &mut dyn TransportContext,
        from: NodeId,
        packet: &Packet,
    ) {
        let header = packet.header;

        if header.is_ack {
            self.counters.ignored_acks += 1;
            debug!(ack = header.ack_number, "Receiver ignoring ACK");
            return;
        }

        let seq = header.sequence_number;
        if seq != self.state.expected_seq {
            if seq > self.state.expected_seq {
                self.counters.early += 1;
            } else {
                self.counters.late += 1;
            }
            ctx.emit(TransportEvent::OutOfOrder {
                expected: self.state.expected_seq,
                received: seq,
            });
            info!(
                expected = self.state.expected_seq,
                received = seq,
                "Unexpected sequence number"
            );
            return;
        }

        self.state.expected_seq = self.state.expected_seq.wrapping_add(1);
        self.state.packets_accepted += 1;
        self.state.bytes_received += packet.payload_len() as u64;
        ctx.emit(TransportEvent::Accepted { seq });
        debug!(seq, bytes = packet.payload_len(), "Accepted data packet");

        self.send_ack(ctx, from, seq);
    }

    fn send_ack(&mut self, ctx: &mut dyn TransportContext, to: NodeId, seq: u32) {
        match ctx.transmit(to, Packet::ack(seq).encode()) {
            Ok(_) => {
                self.counters.acks_sent += 1;
                ctx.emit(TransportEvent::AckSent { seq });
                debug!(seq, "Sent ACK");
            }
            Err(e) => {
                self.counters.ack_failures += 1;
                warn!(seq, error = %e, "Failed to send ACK");
            }
        }
    }
}

impl Endpoint for ReliableReceiver {
    fn start(&mut self, ctx: &mut dyn TransportContext) -> Result<(), RdtError> {
        info!(node = %ctx.local_id(), "Receiver started");
        Ok(())
    }

    fn stop(&mut self, ctx: &mut dyn TransportContext) {
        info!(
            node = %ctx.local_id(),
            packets = self.state.packets_accepted,
            bytes = self.state.bytes_received,
            "Receiver stopped"
        );
    }

    fn on_datagram(&mut self, ctx: &mut dyn TransportContext, from: NodeId, datagram: &[u8]) {
        match Packet::decode(datagram) {
            Ok(packet) => self.on_packet_received(ctx, from, &packet),
            Err(e) => {
                self.counters.malformed += 1;
                ctx.emit(TransportEvent::MalformedHeader { len: datagram.len() });
                warn!(%from, error = %e, "Dropping malformed datagram");
            }
        }
    }

    fn on_timer(&mut self, _ctx: &mut dyn TransportContext, timer: TimerKind) {
        debug!(?timer, "Receiver has no timers");
    }
}

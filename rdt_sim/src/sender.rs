//! Sending endpoint: stop-and-wait with timeout retransmission.
//!
//! At most one data packet is ever unacknowledged. The sender moves through
//! three phases:
//!
//! - **Idle**: nothing outstanding; a `SendNext` timer transmits the next
//!   fresh sequence number
//! - **WaitingForAck**: one packet outstanding with one retransmission timer
//!   armed; the matching ACK returns to Idle, a timeout resends the same
//!   sequence number
//! - **Finished**: every packet acknowledged
//!
//! Retransmission timers carry a generation tag. Every rearm cancels the old
//! timer first and bumps the generation, so a timer that still fires after
//! being superseded is recognised and ignored.

use crate::congestion::{CongestionParams, WindowController, WindowUpdate};
use rdt_env::{
    EventHandle, Endpoint, NodeId, Packet, RdtError, TimerKind, TransportContext, TransportEvent,
    VirtualTime,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sender parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Payload bytes per data packet (header excluded)
    pub packet_size: usize,

    /// Packets to transfer before finishing
    pub max_packets: u32,

    /// Gap between an ACK and the next fresh send
    pub interval: VirtualTime,

    /// Retransmission timeout
    pub timeout: VirtualTime,

    /// Delay between start and the first send
    pub start_delay: VirtualTime,

    /// Window controller constants; `None` keeps `interval` fixed
    pub congestion: Option<CongestionParams>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            packet_size: 1024,
            max_packets: 100,
            interval: Duration::from_secs(1),
            timeout: Duration::from_millis(500),
            start_delay: Duration::from_millis(100),
            congestion: Some(CongestionParams::default()),
        }
    }
}

/// Sender lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderPhase {
    /// Not started yet
    Created,
    Idle,
    WaitingForAck,
    Finished,
    Stopped,
}

/// Per-connection sequence and timer state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Next fresh sequence number
    pub next_seq_to_send: u32,

    /// Sequence number awaiting its ACK
    pub pending_ack_seq: Option<u32>,

    /// The one armed retransmission timer
    pub timer_handle: Option<EventHandle>,

    /// Bumped on every rearm; stale timers carry an older value
    pub timer_generation: u64,
}

/// Sender counters, readable at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderCounters {
    /// Data packets accepted by the channel, retransmissions included
    pub packets_sent: u64,

    /// Timeout-driven resends
    pub retransmissions: u64,

    /// Header plus payload bytes accepted by the channel
    pub bytes_sent: u64,

    /// ACKs matching the pending sequence number
    pub acks_received: u64,

    /// Refused sends plus simulated congestion losses
    pub lost_packets: u64,

    /// Simulated-loss events from the window controller
    pub simulated_loss_events: u64,

    /// Timers that fired after being superseded
    pub stale_timers: u64,

    /// ACKs for anything other than the pending sequence number
    pub ignored_acks: u64,

    /// Data packets addressed to the sender
    pub unexpected_data: u64,

    /// Datagrams too short for a header
    pub malformed: u64,
}

/// Stop-and-wait sender.
#[derive(Debug)]
pub struct ReliableSender {
    peer: NodeId,
    config: SenderConfig,
    phase: SenderPhase,
    state: ConnectionState,
    counters: SenderCounters,

    /// Current gap between ACK and next send
    interval: VirtualTime,

    window: Option<WindowController>,

    /// Pending `SendNext` timer
    send_handle: Option<EventHandle>,

    started_at: Option<VirtualTime>,
    finished_at: Option<VirtualTime>,
    last_ack_at: Option<VirtualTime>,
}

impl ReliableSender {
    /// Creates a sender that transfers to `peer`.
    ///
    /// Fails only on invalid congestion parameters.
    pub fn new(peer: NodeId, config: SenderConfig) -> Result<Self, RdtError> {
        let window = config.congestion.map(WindowController::new).transpose()?;
        Ok(Self {
            peer,
            interval: config.interval,
            config,
            phase: SenderPhase::Created,
            state: ConnectionState::default(),
            counters: SenderCounters::default(),
            window,
            send_handle: None,
            started_at: None,
            finished_at: None,
            last_ack_at: None,
        })
    }

    pub fn phase(&self) -> SenderPhase {
        self.phase
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn counters(&self) -> SenderCounters {
        self.counters
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Window controller, when congestion control is on.
    pub fn window(&self) -> Option<&WindowController> {
        self.window.as_ref()
    }

    /// Gap currently used between an ACK and the next fresh send.
    pub fn current_interval(&self) -> VirtualTime {
        self.interval
    }

    pub fn is_finished(&self) -> bool {
        self.phase == SenderPhase::Finished
    }

    pub fn started_at(&self) -> Option<VirtualTime> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<VirtualTime> {
        self.finished_at
    }

    pub fn last_ack_at(&self) -> Option<VirtualTime> {
        self.last_ack_at
    }

    /// Transmits the next fresh packet, or finishes if all have been sent.
    pub fn send_next(&mut self, ctx: &mut dyn TransportContext) {
        match self.phase {
            SenderPhase::Idle => {}
            SenderPhase::WaitingForAck => {
                debug!(pending = ?self.state.pending_ack_seq, "send_next while waiting for ACK");
                return;
            }
            _ => return,
        }

        if self.state.next_seq_to_send >= self.config.max_packets {
            self.finish(ctx);
            return;
        }

        let seq = self.state.next_seq_to_send;
        let packet = Packet::data(seq, self.config.packet_size);
        let wire_len = packet.wire_len() as u64;

        match ctx.transmit(self.peer, packet.encode()) {
            Ok(_) => {
                self.counters.packets_sent += 1;
                self.counters.bytes_sent += wire_len;
                ctx.emit(TransportEvent::DataSent { seq });
                debug!(seq, bytes = wire_len, "Sent data packet");

                if let Some(window) = self.window.as_mut() {
                    let update = window.on_successful_send();
                    let (cwnd, ssthresh) = (window.cwnd(), window.ssthresh());
                    self.apply_window_update(ctx, update, cwnd, ssthresh);
                }
            }
            Err(e) => {
                self.counters.lost_packets += 1;
                ctx.emit(TransportEvent::SendFailed { seq });
                warn!(seq, error = %e, "Send failed, waiting for timeout");
            }
        }

        self.state.pending_ack_seq = Some(seq);
        self.arm_retransmit(ctx, seq);
        self.state.next_seq_to_send += 1;
        self.phase = SenderPhase::WaitingForAck;
    }

    fn apply_window_update(
        &mut self,
        ctx: &mut dyn TransportContext,
        update: WindowUpdate,
        cwnd: u32,
        ssthresh: u32,
    ) {
        if update.grew {
            ctx.emit(TransportEvent::WindowUpdated { cwnd, ssthresh });
        }
        if let Some(lost) = update.simulated_loss {
            self.counters.lost_packets += lost;
            self.counters.simulated_loss_events += 1;
            ctx.emit(TransportEvent::SimulatedLoss { cwnd, ssthresh });
        }
        if let Some(interval) = update.interval {
            self.interval = interval;
        }
    }

    /// Handles an ACK for `ack_number`.
    pub fn on_ack(&mut self, ctx: &mut dyn TransportContext, ack_number: u32) {
        if self.phase != SenderPhase::WaitingForAck
            || self.state.pending_ack_seq != Some(ack_number)
        {
            self.counters.ignored_acks += 1;
            debug!(ack = ack_number, pending = ?self.state.pending_ack_seq, "Ignoring ACK");
            return;
        }

        self.cancel_retransmit(ctx);
        self.state.pending_ack_seq = None;
        self.counters.acks_received += 1;
        self.last_ack_at = Some(ctx.now());
        self.phase = SenderPhase::Idle;
        ctx.emit(TransportEvent::AckReceived { seq: ack_number });
        debug!(seq = ack_number, "ACK received");

        if self.state.next_seq_to_send >= self.config.max_packets {
            self.finish(ctx);
        } else {
            self.send_handle = Some(ctx.set_timer(self.interval, TimerKind::SendNext));
        }
    }

    fn on_retransmit_timer(&mut self, ctx: &mut dyn TransportContext, seq: u32, generation: u64) {
        let current = self.phase == SenderPhase::WaitingForAck
            && self.state.pending_ack_seq == Some(seq)
            && self.state.timer_generation == generation;
        if !current {
            self.counters.stale_timers += 1;
            ctx.emit(TransportEvent::StaleTimer { seq });
            debug!(seq, generation, "Ignoring stale retransmission timer");
            return;
        }

        self.state.timer_handle = None;
        self.counters.retransmissions += 1;
        info!(seq, "Timeout, retransmitting");

        let packet = Packet::data(seq, self.config.packet_size);
        let wire_len = packet.wire_len() as u64;
        match ctx.transmit(self.peer, packet.encode()) {
            Ok(_) => {
                self.counters.packets_sent += 1;
                self.counters.bytes_sent += wire_len;
                ctx.emit(TransportEvent::Retransmitted { seq });
            }
            Err(e) => {
                self.counters.lost_packets += 1;
                ctx.emit(TransportEvent::SendFailed { seq });
                warn!(seq, error = %e, "Retransmission failed, waiting for timeout");
            }
        }

        self.arm_retransmit(ctx, seq);
    }

    /// Cancel-before-rearm: there is never more than one retransmission timer.
    fn arm_retransmit(&mut self, ctx: &mut dyn TransportContext, seq: u32) {
        self.cancel_retransmit(ctx);
        self.state.timer_generation += 1;
        let timer = TimerKind::Retransmit {
            seq,
            generation: self.state.timer_generation,
        };
        self.state.timer_handle = Some(ctx.set_timer(self.config.timeout, timer));
    }

    fn cancel_retransmit(&mut self, ctx: &mut dyn TransportContext) {
        if let Some(handle) = self.state.timer_handle.take() {
            ctx.cancel_timer(handle);
        }
    }

    fn finish(&mut self, ctx: &mut dyn TransportContext) {
        self.phase = SenderPhase::Finished;
        self.finished_at = Some(ctx.now());
        let packets = self.config.max_packets;
        ctx.emit(TransportEvent::Completed { packets });
        info!(
            packets,
            retransmissions = self.counters.retransmissions,
            "Finished sending all packets"
        );
    }
}

impl Endpoint for ReliableSender {
    fn start(&mut self, ctx: &mut dyn TransportContext) -> Result<(), RdtError> {
        if self.phase != SenderPhase::Created {
            return Err(RdtError::setup("sender already started"));
        }
        if self.config.timeout.is_zero() {
            return Err(RdtError::setup("retransmission timeout must be positive"));
        }
        if self.peer == ctx.local_id() {
            return Err(RdtError::setup(format!("sender {} cannot target itself", self.peer)));
        }

        self.phase = SenderPhase::Idle;
        self.started_at = Some(ctx.now());
        self.send_handle = Some(ctx.set_timer(self.config.start_delay, TimerKind::SendNext));
        info!(
            node = %ctx.local_id(),
            peer = %self.peer,
            max_packets = self.config.max_packets,
            "Sender started"
        );
        Ok(())
    }

    fn stop(&mut self, ctx: &mut dyn TransportContext) {
        self.cancel_retransmit(ctx);
        if let Some(handle) = self.send_handle.take() {
            ctx.cancel_timer(handle);
        }
        if self.phase != SenderPhase::Finished {
            self.phase = SenderPhase::Stopped;
        }
        info!(
            node = %ctx.local_id(),
            packets_sent = self.counters.packets_sent,
            retransmissions = self.counters.retransmissions,
            bytes_sent = self.counters.bytes_sent,
            "Sender stopped"
        );
    }

    fn on_datagram(&mut self, ctx: &mut dyn TransportContext, from: NodeId, datagram: &[u8]) {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.counters.malformed += 1;
                ctx.emit(TransportEvent::MalformedHeader { len: datagram.len() });
                warn!(%from, error = %e, "Dropping malformed datagram");
                return;
            }
        };

        if packet.header.is_ack {
            self.on_ack(ctx, packet.header.ack_number);
        } else {
            self.counters.unexpected_data += 1;
            debug!(seq = packet.header.sequence_number, "Sender ignoring data packet");
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn TransportContext, timer: TimerKind) {
        match timer {
            TimerKind::SendNext => {
                self.send_handle = None;
                self.send_next(ctx);
            }
            TimerKind::Retransmit { seq, generation } => {
                self.on_retransmit_timer(ctx, seq, generation)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockContext;

    fn receiver_id() -> NodeId {
        NodeId::from_seed(1)
    }

    fn config(max_packets: u32) -> SenderConfig {
        SenderConfig {
            packet_size: 100,
            max_packets,
            congestion: None,
            ..Default::default()
        }
    }

    fn started(max_packets: u32) -> (ReliableSender, MockContext) {
        let mut tx = ReliableSender::new(receiver_id(), config(max_packets)).unwrap();
        let mut ctx = MockContext::new(NodeId::from_seed(0));
        tx.start(&mut ctx).unwrap();
        (tx, ctx)
    }

    fn fire(tx: &mut ReliableSender, ctx: &mut MockContext) -> TimerKind {
        let timer = ctx.fire_next().expect("a timer should be armed");
        tx.on_timer(ctx, timer);
        timer
    }

    fn ack(tx: &mut ReliableSender, ctx: &mut MockContext, seq: u32) {
        tx.on_datagram(ctx, receiver_id(), &Packet::ack(seq).encode());
    }

    fn retransmit_timers(ctx: &MockContext) -> usize {
        ctx.armed()
            .iter()
            .filter(|(_, t)| matches!(t, TimerKind::Retransmit { .. }))
            .count()
    }

    #[test]
    fn test_first_send_after_start_delay() {
        let (mut tx, mut ctx) = started(3);
        assert_eq!(tx.phase(), SenderPhase::Idle);
        assert!(ctx.sent.is_empty());

        assert_eq!(fire(&mut tx, &mut ctx), TimerKind::SendNext);
        assert_eq!(ctx.now, Duration::from_millis(100));
        assert_eq!(tx.phase(), SenderPhase::WaitingForAck);
        assert_eq!(tx.state().pending_ack_seq, Some(0));
        assert_eq!(tx.state().next_seq_to_send, 1);
        assert_eq!(tx.counters().packets_sent, 1);
        assert_eq!(tx.counters().bytes_sent, 109);

        let headers = ctx.sent_headers();
        assert_eq!(headers.len(), 1);
        assert!(!headers[0].is_ack);
        assert_eq!(headers[0].sequence_number, 0);
    }

    #[test]
    fn test_ack_schedules_next_send_after_interval() {
        let (mut tx, mut ctx) = started(3);
        fire(&mut tx, &mut ctx);
        ack(&mut tx, &mut ctx, 0);

        assert_eq!(tx.phase(), SenderPhase::Idle);
        assert_eq!(tx.state().pending_ack_seq, None);
        assert_eq!(retransmit_timers(&ctx), 0);

        let armed = ctx.armed();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].1, TimerKind::SendNext);
        assert_eq!(armed[0].0.fire_time(), ctx.now + Duration::from_secs(1));
    }

    #[test]
    fn test_at_most_one_outstanding() {
        let (mut tx, mut ctx) = started(4);

        for seq in 0..4 {
            fire(&mut tx, &mut ctx);
            assert!(retransmit_timers(&ctx) <= 1);
            // duplicate SendNext while waiting must not send anything new
            tx.send_next(&mut ctx);
            assert_eq!(tx.state().pending_ack_seq, Some(seq));
            assert_eq!(retransmit_timers(&ctx), 1);
            ack(&mut tx, &mut ctx, seq);
            assert_eq!(retransmit_timers(&ctx), 0);
        }

        assert!(tx.is_finished());
        assert_eq!(tx.counters().packets_sent, 4);
        assert_eq!(tx.counters().retransmissions, 0);
    }

    #[test]
    fn test_timeout_resends_same_sequence() {
        let (mut tx, mut ctx) = started(2);
        fire(&mut tx, &mut ctx);
        let sent_at = ctx.now;

        let timer = fire(&mut tx, &mut ctx);
        assert!(matches!(timer, TimerKind::Retransmit { seq: 0, .. }));
        assert_eq!(ctx.now, sent_at + Duration::from_millis(500));
        assert_eq!(tx.counters().retransmissions, 1);
        assert_eq!(tx.counters().packets_sent, 2);
        assert_eq!(tx.state().pending_ack_seq, Some(0));
        assert_eq!(tx.state().next_seq_to_send, 1);

        let seqs: Vec<u32> = ctx.sent_headers().iter().map(|h| h.sequence_number).collect();
        assert_eq!(seqs, vec![0, 0]);
        assert_eq!(retransmit_timers(&ctx), 1);
        assert!(ctx.events.contains(&TransportEvent::Retransmitted { seq: 0 }));
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let (mut tx, mut ctx) = started(2);
        fire(&mut tx, &mut ctx);
        let stale = TimerKind::Retransmit {
            seq: 0,
            generation: tx.state().timer_generation,
        };
        ack(&mut tx, &mut ctx, 0);

        tx.on_timer(&mut ctx, stale);

        assert_eq!(tx.counters().retransmissions, 0);
        assert_eq!(tx.counters().stale_timers, 1);
        assert_eq!(ctx.sent.len(), 1);
    }

    #[test]
    fn test_superseded_generation_is_ignored() {
        let (mut tx, mut ctx) = started(2);
        fire(&mut tx, &mut ctx);
        let first_generation = tx.state().timer_generation;
        fire(&mut tx, &mut ctx); // timeout rearms with a new generation

        tx.on_timer(
            &mut ctx,
            TimerKind::Retransmit {
                seq: 0,
                generation: first_generation,
            },
        );
        assert_eq!(tx.counters().retransmissions, 1);
        assert_eq!(tx.counters().stale_timers, 1);
    }

    #[test]
    fn test_unexpected_ack_is_ignored() {
        let (mut tx, mut ctx) = started(2);
        fire(&mut tx, &mut ctx);
        ack(&mut tx, &mut ctx, 7);

        assert_eq!(tx.phase(), SenderPhase::WaitingForAck);
        assert_eq!(tx.state().pending_ack_seq, Some(0));
        assert_eq!(tx.counters().ignored_acks, 1);
    }

    #[test]
    fn test_data_packet_at_sender_counted_apart_from_acks() {
        let (mut tx, mut ctx) = started(2);
        fire(&mut tx, &mut ctx);
        tx.on_datagram(&mut ctx, receiver_id(), &Packet::data(0, 16).encode());

        assert_eq!(tx.phase(), SenderPhase::WaitingForAck);
        assert_eq!(tx.counters().unexpected_data, 1);
        assert_eq!(tx.counters().ignored_acks, 0);
        assert_eq!(tx.counters().acks_received, 0);
    }

    #[test]
    fn test_send_failure_keeps_pending_and_timer() {
        let (mut tx, mut ctx) = started(2);
        ctx.refuse_next = 1;
        fire(&mut tx, &mut ctx);

        assert_eq!(tx.counters().lost_packets, 1);
        assert_eq!(tx.counters().packets_sent, 0);
        assert_eq!(tx.state().pending_ack_seq, Some(0));
        assert_eq!(retransmit_timers(&ctx), 1);
        assert!(ctx.sent.is_empty());

        // the timeout recovers
        fire(&mut tx, &mut ctx);
        assert_eq!(tx.counters().retransmissions, 1);
        assert_eq!(ctx.sent_headers()[0].sequence_number, 0);
    }

    #[test]
    fn test_zero_packets_finishes_immediately() {
        let (mut tx, mut ctx) = started(0);
        fire(&mut tx, &mut ctx);
        assert!(tx.is_finished());
        assert!(ctx.sent.is_empty());
        assert!(ctx.events.contains(&TransportEvent::Completed { packets: 0 }));
    }

    #[test]
    fn test_stop_cancels_timers() {
        let (mut tx, mut ctx) = started(5);
        fire(&mut tx, &mut ctx);
        tx.stop(&mut ctx);

        assert_eq!(tx.phase(), SenderPhase::Stopped);
        assert!(ctx.armed().is_empty());

        ack(&mut tx, &mut ctx, 0);
        assert_eq!(tx.counters().acks_received, 0);
    }

    #[test]
    fn test_start_rejects_bad_setup() {
        let mut ctx = MockContext::new(receiver_id());
        let mut tx = ReliableSender::new(receiver_id(), config(1)).unwrap();
        assert!(matches!(tx.start(&mut ctx), Err(RdtError::EndpointSetup(_))));

        let zero_timeout = SenderConfig {
            timeout: Duration::ZERO,
            ..config(1)
        };
        let mut ctx = MockContext::new(NodeId::from_seed(0));
        let mut tx = ReliableSender::new(receiver_id(), zero_timeout).unwrap();
        assert!(tx.start(&mut ctx).is_err());
    }

    #[test]
    fn test_congestion_control_repaces_sends() {
        let cfg = SenderConfig {
            congestion: Some(CongestionParams::default()),
            interval: Duration::from_millis(50),
            ..config(100)
        };
        let mut tx = ReliableSender::new(receiver_id(), cfg).unwrap();
        let mut ctx = MockContext::new(NodeId::from_seed(0));
        tx.start(&mut ctx).unwrap();

        for seq in 0..40 {
            fire(&mut tx, &mut ctx);
            ack(&mut tx, &mut ctx, seq);
            if seq == 14 {
                // 15th send: 4 -> 6, interval 1/6 s
                assert_eq!(tx.current_interval(), Duration::from_secs_f64(1.0 / 6.0));
            }
        }

        // 40th send simulated a loss: two packets booked as lost
        assert_eq!(tx.counters().simulated_loss_events, 1);
        assert_eq!(tx.counters().lost_packets, 2);
        assert_eq!(tx.window().map(|w| w.cwnd()), Some(4));
        assert_eq!(tx.current_interval(), Duration::from_secs_f64(0.25));
    }
}

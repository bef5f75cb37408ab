//! SimWorld - The simulation harness container.
//!
//! Owns the scheduler, the link and both endpoints. Every scheduled event is
//! plain data; the world pops it and hands it to the endpoint it addresses
//! through a `TransportContext` bound to that endpoint.

use crate::channel::{ChannelStats, LossyChannel};
use crate::config::SimConfig;
use crate::receiver::ReliableReceiver;
use crate::scheduler::{EventScheduler, SchedulerStats};
use crate::sender::ReliableSender;
use crate::stats::{RunReport, StatsContext};
use crate::trace::{PacketTrace, TraceEvent, TraceRecord};

use rdt_env::{
    delay_from_secs, Channel, DeliveryQueue, Endpoint, EventHandle, NetworkController, NodeId,
    RdtError, TimerKind, TransportContext, TransportEvent, VirtualTime,
};
use serde::Serialize;
use tracing::{debug, error, info};

/// Everything that can sit in the event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Start(NodeId),
    Stop(NodeId),
    Deliver {
        from: NodeId,
        to: NodeId,
        /// When the datagram entered the channel
        sent_at: VirtualTime,
        datagram: Vec<u8>,
    },
    Timer {
        node: NodeId,
        timer: TimerKind,
    },
}

impl DeliveryQueue for EventScheduler<SimEvent> {
    fn deliver_after(
        &mut self,
        delay: VirtualTime,
        from: NodeId,
        to: NodeId,
        datagram: Vec<u8>,
    ) -> EventHandle {
        let sent_at = self.now();
        self.schedule_after(
            delay,
            SimEvent::Deliver {
                from,
                to,
                sent_at,
                datagram,
            },
        )
    }
}

/// Endpoint lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    /// Start time not reached yet
    Idle,
    Running,
    Stopped,
    /// `start` returned an error; the node ignores everything afterwards
    Failed,
}

#[derive(Debug)]
struct NodeSlot<E> {
    id: NodeId,
    status: NodeStatus,
    failure: Option<RdtError>,
    endpoint: E,
}

impl<E> NodeSlot<E> {
    fn new(id: NodeId, endpoint: E) -> Self {
        Self {
            id,
            status: NodeStatus::Idle,
            failure: None,
            endpoint,
        }
    }
}

/// The two endpoints of the run.
#[derive(Debug)]
struct Nodes {
    sender: NodeSlot<ReliableSender>,
    receiver: NodeSlot<ReliableReceiver>,
}

impl Nodes {
    fn get_mut(
        &mut self,
        id: NodeId,
    ) -> Option<(&mut NodeStatus, &mut Option<RdtError>, &mut dyn Endpoint)> {
        if id == self.sender.id {
            let slot = &mut self.sender;
            Some((&mut slot.status, &mut slot.failure, &mut slot.endpoint as &mut dyn Endpoint))
        } else if id == self.receiver.id {
            let slot = &mut self.receiver;
            Some((&mut slot.status, &mut slot.failure, &mut slot.endpoint as &mut dyn Endpoint))
        } else {
            None
        }
    }
}

/// One-way delay of datagrams handed to a running node.
#[derive(Debug, Clone, Copy, Default)]
struct DelaySamples {
    count: u64,
    total: VirtualTime,
}

impl DelaySamples {
    fn record(&mut self, delay: VirtualTime) {
        self.count += 1;
        self.total += delay;
    }

    fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total.as_secs_f64() * 1000.0 / self.count as f64
    }
}

/// The wire and what it saw.
struct Link {
    channel: LossyChannel,

    /// `[sender, receiver]`
    node_ids: [NodeId; 2],
    trace: PacketTrace,

    /// Data direction only, duplicates included
    data_delay: DelaySamples,
}

/// `TransportContext` bound to one node for the duration of one callback.
struct WorldCtx<'a> {
    scheduler: &'a mut EventScheduler<SimEvent>,
    link: &'a mut Link,
    local: NodeId,
}

impl WorldCtx<'_> {
    fn record(&mut self, event: TraceEvent) {
        self.link.trace.record(self.scheduler.now(), self.local, event);
    }
}

impl TransportContext for WorldCtx<'_> {
    fn now(&self) -> VirtualTime {
        self.scheduler.now()
    }

    fn local_id(&self) -> NodeId {
        self.local
    }

    fn transmit(&mut self, to: NodeId, datagram: Vec<u8>) -> Result<bool, RdtError> {
        if !self.link.node_ids.contains(&to) {
            return Err(RdtError::transmission(format!("no route to {to}")));
        }

        let len = datagram.len();
        let result = self
            .link
            .channel
            .transmit(&mut *self.scheduler, datagram, self.local, to);
        match &result {
            Ok(true) => {}
            Ok(false) => self.record(TraceEvent::Dropped { to, len }),
            Err(_) => self.record(TraceEvent::Refused { to, len }),
        }
        result
    }

    fn set_timer(&mut self, delay: VirtualTime, timer: TimerKind) -> EventHandle {
        let node = self.local;
        self.scheduler.schedule_after(delay, SimEvent::Timer { node, timer })
    }

    fn cancel_timer(&mut self, handle: EventHandle) {
        self.scheduler.cancel(handle);
    }

    fn emit(&mut self, event: TransportEvent) {
        self.record(TraceEvent::Endpoint(event));
    }
}

fn dispatch(
    scheduler: &mut EventScheduler<SimEvent>,
    nodes: &mut Nodes,
    link: &mut Link,
    event: SimEvent,
) {
    let target = match &event {
        SimEvent::Start(id) | SimEvent::Stop(id) => *id,
        SimEvent::Deliver { to, .. } => *to,
        SimEvent::Timer { node, .. } => *node,
    };
    let Some((status, failure, endpoint)) = nodes.get_mut(target) else {
        debug!(node = %target, "Event for unknown node");
        return;
    };
    let mut ctx = WorldCtx {
        scheduler,
        link,
        local: target,
    };

    match event {
        SimEvent::Start(_) => {
            if *status != NodeStatus::Idle {
                return;
            }
            match endpoint.start(&mut ctx) {
                Ok(()) => {
                    *status = NodeStatus::Running;
                    ctx.record(TraceEvent::Started);
                }
                Err(e) => {
                    error!(node = %target, error = %e, "Endpoint failed to start");
                    *status = NodeStatus::Failed;
                    *failure = Some(e);
                }
            }
        }
        SimEvent::Stop(_) => {
            if *status == NodeStatus::Running {
                endpoint.stop(&mut ctx);
                *status = NodeStatus::Stopped;
                ctx.record(TraceEvent::Stopped);
            }
        }
        SimEvent::Deliver {
            from,
            sent_at,
            datagram,
            ..
        } => {
            let len = datagram.len();
            if *status == NodeStatus::Running {
                if target == ctx.link.node_ids[1] {
                    let delay = ctx.scheduler.now().saturating_sub(sent_at);
                    ctx.link.data_delay.record(delay);
                }
                ctx.record(TraceEvent::Delivered { from, len });
                endpoint.on_datagram(&mut ctx, from, &datagram);
            } else {
                debug!(node = %target, ?status, "Discarding datagram for inactive node");
                ctx.record(TraceEvent::Discarded { from, len });
            }
        }
        SimEvent::Timer { timer, .. } => {
            if *status == NodeStatus::Running {
                endpoint.on_timer(&mut ctx, timer);
            }
        }
    }
}

/// The SimWorld - container for one sender, one receiver and the link between them.
pub struct SimWorld {
    /// Configuration
    config: SimConfig,

    /// Run label carried into the report
    label: String,

    scheduler: EventScheduler<SimEvent>,

    nodes: Nodes,

    link: Link,

    /// Virtual time at which both endpoints stop
    end: VirtualTime,
}

impl SimWorld {
    /// Builds a world and schedules both endpoints' start and stop.
    pub fn new(config: SimConfig) -> Result<Self, RdtError> {
        config.validate()?;

        let sender_id = NodeId::from_seed(0);
        let receiver_id = NodeId::from_seed(1);

        let channel = LossyChannel::new(config.channel_spec()?, config.seed)?
            .with_data_rate(config.data_rate_bps)?;
        let sender = ReliableSender::new(receiver_id, config.sender_config()?)?;

        let end = config.end_time()?;
        let mut scheduler = EventScheduler::new();
        scheduler.schedule_at(delay_from_secs(config.receiver_start)?, SimEvent::Start(receiver_id))?;
        scheduler.schedule_at(delay_from_secs(config.sender_start)?, SimEvent::Start(sender_id))?;
        scheduler.schedule_at(end, SimEvent::Stop(sender_id))?;
        scheduler.schedule_at(end, SimEvent::Stop(receiver_id))?;

        info!(
            seed = config.seed,
            max_packets = config.max_packets,
            error_rate = config.error_rate,
            "SimWorld created"
        );

        Ok(Self {
            label: "run".to_string(),
            scheduler,
            nodes: Nodes {
                sender: NodeSlot::new(sender_id, sender),
                receiver: NodeSlot::new(receiver_id, ReliableReceiver::new()),
            },
            link: Link {
                channel,
                node_ids: [sender_id, receiver_id],
                trace: PacketTrace::new(config.trace),
                data_delay: DelaySamples::default(),
            },
            end,
            config,
        })
    }

    /// Sets the label used in the run report.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Fires every event due at or before `deadline`. Returns the number fired.
    pub fn run_until(&mut self, deadline: VirtualTime) -> u64 {
        let Self {
            scheduler,
            nodes,
            link,
            ..
        } = self;
        scheduler.run_until(deadline, |sched, event| dispatch(sched, nodes, link, event))
    }

    /// Runs to the configured simulation time.
    pub fn run_to_end(&mut self) -> u64 {
        self.run_until(self.end)
    }

    /// Runs to the end and appends this run's report to `stats`.
    pub fn run(mut self, mut stats: StatsContext) -> StatsContext {
        self.run_to_end();
        let report = self.report();
        info!(
            label = %report.label,
            completed = report.completed,
            retransmissions = report.retransmissions,
            throughput_mbps = report.throughput_mbps,
            "Run finished"
        );
        stats.record(report);
        stats
    }

    /// Snapshot of the counters and the metrics derived from them.
    pub fn report(&self) -> RunReport {
        let sender = &self.nodes.sender.endpoint;
        let tx = sender.counters();
        let rx = self.nodes.receiver.endpoint.state();
        let rx_counters = self.nodes.receiver.endpoint.counters();
        let channel = self.link.channel.stats();

        let now = self.scheduler.now();
        let transfer_time_secs = sender
            .started_at()
            .map(|start| sender.finished_at().unwrap_or(now).saturating_sub(start))
            .map_or(0.0, |d| d.as_secs_f64());

        let mut report = RunReport {
            label: self.label.clone(),
            seed: self.config.seed,
            completed: sender.is_finished(),
            packets_sent: tx.packets_sent,
            retransmissions: tx.retransmissions,
            bytes_sent: tx.bytes_sent,
            acks_received: tx.acks_received,
            lost_packets: tx.lost_packets,
            simulated_loss_events: tx.simulated_loss_events,
            packets_received: rx.packets_accepted,
            bytes_received: rx.bytes_received,
            out_of_order: rx_counters.out_of_order(),
            channel_drops: channel.dropped + channel.forced_drops,
            delay_samples: self.link.data_delay.count,
            mean_delay_ms: self.link.data_delay.mean_ms(),
            transfer_time_secs,
            throughput_mbps: 0.0,
            goodput_mbps: 0.0,
            retransmission_ratio_pct: 0.0,
            final_cwnd: sender.window().map(|w| w.cwnd()),
            final_ssthresh: sender.window().map(|w| w.ssthresh()),
            sim_time_secs: now.as_secs_f64(),
            events_fired: self.scheduler.stats().fired,
        };
        report.derive_rates();
        report
    }

    /// Fault injection on the link.
    pub fn network(&mut self) -> &mut dyn NetworkController {
        &mut self.link.channel
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualTime {
        self.scheduler.now()
    }

    pub fn end_time(&self) -> VirtualTime {
        self.end
    }

    pub fn sender(&self) -> &ReliableSender {
        &self.nodes.sender.endpoint
    }

    pub fn receiver(&self) -> &ReliableReceiver {
        &self.nodes.receiver.endpoint
    }

    pub fn sender_id(&self) -> NodeId {
        self.nodes.sender.id
    }

    pub fn receiver_id(&self) -> NodeId {
        self.nodes.receiver.id
    }

    /// Lifecycle status of a node, `None` for unknown ids.
    pub fn node_status(&self, id: NodeId) -> Option<NodeStatus> {
        if id == self.nodes.sender.id {
            Some(self.nodes.sender.status)
        } else if id == self.nodes.receiver.id {
            Some(self.nodes.receiver.status)
        } else {
            None
        }
    }

    /// Why a node failed to start, if it did.
    pub fn node_failure(&self, id: NodeId) -> Option<&RdtError> {
        if id == self.nodes.sender.id {
            self.nodes.sender.failure.as_ref()
        } else if id == self.nodes.receiver.id {
            self.nodes.receiver.failure.as_ref()
        } else {
            None
        }
    }

    /// Trace records; empty unless tracing is on.
    pub fn trace(&self) -> &[TraceRecord] {
        self.link.trace.records()
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.link.channel.stats()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Events still queued.
    pub fn pending_events(&self) -> usize {
        self.scheduler.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::SenderPhase;
    use std::time::Duration;

    fn lossless(max_packets: u32) -> SimConfig {
        SimConfig {
            error_rate: 0.0,
            max_packets,
            trace: true,
            ..Default::default()
        }
    }

    fn endpoint_events(world: &SimWorld, node: NodeId) -> Vec<(f64, TransportEvent)> {
        world
            .trace()
            .iter()
            .filter(|r| r.node == node)
            .filter_map(|r| match r.event {
                TraceEvent::Endpoint(e) => Some((r.time, e)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_sim_world_creation() {
        let world = SimWorld::new(lossless(5)).unwrap();
        assert_eq!(world.now(), Duration::ZERO);
        assert_eq!(world.pending_events(), 4);
        assert_eq!(world.node_status(world.sender_id()), Some(NodeStatus::Idle));
        assert_eq!(world.end_time(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SimConfig {
            error_rate: -0.1,
            ..Default::default()
        };
        assert!(matches!(SimWorld::new(config), Err(RdtError::InvalidConfig(_))));
    }

    #[test]
    fn test_deterministic_completion() {
        let mut world = SimWorld::new(lossless(5)).unwrap();
        world.run_to_end();

        let sender = world.sender();
        assert_eq!(sender.phase(), SenderPhase::Finished);
        assert_eq!(sender.counters().retransmissions, 0);
        assert_eq!(sender.counters().acks_received, 5);
        assert_eq!(world.receiver().counters().acks_sent, 5);
        assert_eq!(world.receiver().state().packets_accepted, 5);
        assert_eq!(world.receiver().state().bytes_received, 5 * 1024);
        assert_eq!(sender.counters().bytes_sent, 5 * 1033);

        assert_eq!(world.node_status(world.sender_id()), Some(NodeStatus::Stopped));
        assert_eq!(world.now(), Duration::from_secs(30));
    }

    #[test]
    fn test_monotonic_delivery() {
        let mut world = SimWorld::new(lossless(20)).unwrap();
        world.run_to_end();

        let accepted: Vec<u32> = endpoint_events(&world, world.receiver_id())
            .into_iter()
            .filter_map(|(_, e)| match e {
                TransportEvent::Accepted { seq } => Some(seq),
                _ => None,
            })
            .collect();
        assert_eq!(accepted, (0..20).collect::<Vec<_>>());
        assert_eq!(world.receiver().expected_seq(), 20);
        assert!(world.sender().is_finished());
    }

    #[test]
    fn test_forced_drop_triggers_one_retransmission() {
        let mut world = SimWorld::new(lossless(3)).unwrap();
        let (tx, rx) = (world.sender_id(), world.receiver_id());
        world.network().force_drop(tx, rx, 1);
        world.run_to_end();

        let events = endpoint_events(&world, tx);
        let sent_at = events
            .iter()
            .find(|(_, e)| *e == TransportEvent::DataSent { seq: 0 })
            .map(|(t, _)| *t)
            .unwrap();
        let resent_at = events
            .iter()
            .find(|(_, e)| *e == TransportEvent::Retransmitted { seq: 0 })
            .map(|(t, _)| *t)
            .unwrap();

        assert!((resent_at - sent_at - 0.5).abs() < 1e-9);
        assert_eq!(world.sender().counters().retransmissions, 1);
        assert_eq!(world.channel_stats().forced_drops, 1);
        assert!(world.sender().is_finished());
        assert_eq!(world.receiver().state().packets_accepted, 3);
    }

    #[test]
    fn test_lost_ack_stalls_sender() {
        let mut world = SimWorld::new(lossless(3)).unwrap();
        let (tx, rx) = (world.sender_id(), world.receiver_id());
        world.network().force_drop(rx, tx, 1);
        world.run_to_end();

        // The receiver already consumed seq 0 and never ACKs the duplicates
        assert!(!world.sender().is_finished());
        assert_eq!(world.sender().state().pending_ack_seq, Some(0));
        assert_eq!(world.receiver().state().packets_accepted, 1);
        assert!(world.receiver().counters().late > 10);
        assert!(world.sender().counters().retransmissions > 10);

        // Stopping cancelled the last retransmission timer
        assert_eq!(world.pending_events(), 0);
    }

    #[test]
    fn test_same_seed_same_run() {
        let config = SimConfig {
            error_rate: 0.3,
            max_packets: 30,
            trace: true,
            ..Default::default()
        };

        let mut a = SimWorld::new(config.clone()).unwrap();
        let mut b = SimWorld::new(config.clone()).unwrap();
        a.run_to_end();
        b.run_to_end();
        assert_eq!(a.report(), b.report());
        assert_eq!(a.trace(), b.trace());

        let mut c = SimWorld::new(config.with_seed(7)).unwrap();
        c.run_to_end();
        assert_ne!(a.trace(), c.trace());
    }

    #[test]
    fn test_datagrams_to_inactive_node_are_discarded() {
        let config = SimConfig {
            receiver_start: 3.0,
            ..lossless(2)
        };
        let mut world = SimWorld::new(config).unwrap();
        world.run_to_end();

        let discarded = world
            .trace()
            .iter()
            .filter(|r| matches!(r.event, TraceEvent::Discarded { .. }))
            .count();
        assert!(discarded >= 1);
        assert!(world.sender().counters().retransmissions >= 1);
        assert!(world.sender().is_finished());
    }

    #[test]
    fn test_refused_send_recovers_by_timeout() {
        let mut world = SimWorld::new(lossless(2)).unwrap();
        world.network().force_refuse(1);
        world.run_to_end();

        let counters = world.sender().counters();
        assert_eq!(counters.lost_packets, 1);
        assert_eq!(counters.retransmissions, 1);
        assert!(world.sender().is_finished());
        assert!(world
            .trace()
            .iter()
            .any(|r| matches!(r.event, TraceEvent::Refused { .. })));
    }

    #[test]
    fn test_run_appends_report() {
        let mut stats = StatsContext::new();
        stats = SimWorld::new(lossless(5))
            .unwrap()
            .with_label("first")
            .run(stats);
        stats = SimWorld::new(lossless(5).with_seed(9))
            .unwrap()
            .with_label("second")
            .run(stats);

        assert_eq!(stats.len(), 2);
        let first = &stats.runs()[0];
        assert_eq!(first.label, "first");
        assert!(first.completed);
        assert_eq!(first.retransmission_ratio_pct, 0.0);
        assert!(first.throughput_mbps > 0.0);
        assert!(first.goodput_mbps > 0.0);
        assert!(first.transfer_time_secs > 0.0);
    }

    #[test]
    fn test_sender_setup_failure_aborts_only_the_sender() {
        // Passes config validation but truncates to a zero Duration
        let config = SimConfig {
            timeout: 1e-12,
            ..lossless(5)
        };
        let mut world = SimWorld::new(config).unwrap();
        world.run_to_end();
        let (tx, rx) = (world.sender_id(), world.receiver_id());

        assert_eq!(world.node_status(tx), Some(NodeStatus::Failed));
        assert!(matches!(world.node_failure(tx), Some(RdtError::EndpointSetup(_))));
        assert_eq!(world.sender().phase(), SenderPhase::Created);
        assert_eq!(world.sender().counters().packets_sent, 0);

        assert_eq!(world.node_status(rx), Some(NodeStatus::Stopped));
        assert!(world.node_failure(rx).is_none());
        assert_eq!(world.receiver().state().packets_accepted, 0);

        let lifecycle: Vec<(NodeId, TraceEvent)> = world
            .trace()
            .iter()
            .filter(|r| matches!(r.event, TraceEvent::Started | TraceEvent::Stopped))
            .map(|r| (r.node, r.event))
            .collect();
        assert_eq!(
            lifecycle,
            vec![(rx, TraceEvent::Started), (rx, TraceEvent::Stopped)]
        );
        assert!(!world.report().completed);
    }

    #[test]
    fn test_oversized_min_interval_rejected() {
        let mut config = lossless(20);
        config.congestion.min_interval = 1e300;
        assert!(matches!(SimWorld::new(config), Err(RdtError::InvalidConfig(_))));
    }

    #[test]
    fn test_mean_delay_is_propagation_plus_serialization() {
        let mut world = SimWorld::new(lossless(5)).unwrap();
        world.run_to_end();
        let report = world.report();

        // 2 ms propagation + 1033 bytes at 5 Mbps; ACKs are not sampled
        let expected_ms = 2.0 + 1033.0 * 8.0 / 5_000_000.0 * 1000.0;
        assert_eq!(report.delay_samples, 5);
        assert!((report.mean_delay_ms - expected_ms).abs() < 1e-4);

        let config = SimConfig {
            data_rate_bps: None,
            ..lossless(5)
        };
        let mut world = SimWorld::new(config).unwrap();
        world.run_to_end();
        assert!((world.report().mean_delay_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_until_is_resumable() {
        let mut world = SimWorld::new(lossless(5)).unwrap();
        world.run_until(Duration::from_millis(2050));
        assert_eq!(world.node_status(world.sender_id()), Some(NodeStatus::Running));
        assert_eq!(world.sender().counters().packets_sent, 0);

        world.run_until(Duration::from_millis(2150));
        assert_eq!(world.sender().counters().packets_sent, 1);

        world.run_to_end();
        assert!(world.sender().is_finished());
    }
}

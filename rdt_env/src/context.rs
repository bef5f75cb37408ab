//! Capability interfaces for transport endpoints.
//!
//! Endpoints never see the scheduler or the channel directly. Everything they
//! can do to the outside world goes through a [`TransportContext`], and
//! everything the outside world does to them arrives through [`Endpoint`].

use crate::error::RdtError;
use crate::types::{EventHandle, NodeId, TimerKind, VirtualTime};
use serde::{Deserialize, Serialize};

/// Notable things an endpoint did or observed.
///
/// Reported through [`TransportContext::emit`] so the environment can trace
/// them. Endpoints keep their own counters regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportEvent {
    DataSent { seq: u32 },
    Retransmitted { seq: u32 },
    SendFailed { seq: u32 },
    AckReceived { seq: u32 },
    StaleTimer { seq: u32 },
    Accepted { seq: u32 },
    AckSent { seq: u32 },
    OutOfOrder { expected: u32, received: u32 },
    MalformedHeader { len: usize },
    WindowUpdated { cwnd: u32, ssthresh: u32 },
    SimulatedLoss { cwnd: u32, ssthresh: u32 },
    Completed { packets: u32 },
}

/// What an endpoint may ask of its environment while handling an event.
///
/// # Implementations
///
/// - **Simulation**: `rdt_sim::world` binds the event scheduler and the lossy
///   channel for the node whose callback is running.
///
/// All calls happen inside a scheduled callback; there is no concurrency.
pub trait TransportContext {
    /// Current virtual time.
    fn now(&self) -> VirtualTime;

    /// The node this context belongs to.
    fn local_id(&self) -> NodeId;

    /// Hands a datagram to the channel.
    ///
    /// # Returns
    /// * `Ok(true)` - accepted and scheduled for delivery
    /// * `Ok(false)` - accepted but lost on the wire
    /// * `Err(RdtError::TransmissionFailure)` - refused outright
    ///
    /// The sender cannot tell `Ok(true)` from `Ok(false)` in practice; only the
    /// missing ACK reveals the loss.
    fn transmit(&mut self, to: NodeId, datagram: Vec<u8>) -> Result<bool, RdtError>;

    /// Arms a timer that fires `delay` from now.
    fn set_timer(&mut self, delay: VirtualTime, timer: TimerKind) -> EventHandle;

    /// Cancels a timer. Idempotent: fired or already-cancelled handles are a no-op.
    fn cancel_timer(&mut self, handle: EventHandle);

    /// Reports a diagnostic event. Ignored unless the environment traces.
    fn emit(&mut self, _event: TransportEvent) {}
}

/// The role-level hooks every transport endpoint implements.
pub trait Endpoint {
    /// Called once when the endpoint's start time is reached.
    ///
    /// An error here is fatal for this endpoint only.
    fn start(&mut self, ctx: &mut dyn TransportContext) -> Result<(), RdtError>;

    /// Called once when the endpoint's stop time is reached.
    fn stop(&mut self, ctx: &mut dyn TransportContext);

    /// A datagram from `from` arrived.
    fn on_datagram(&mut self, ctx: &mut dyn TransportContext, from: NodeId, datagram: &[u8]);

    /// A timer armed through [`TransportContext::set_timer`] fired.
    fn on_timer(&mut self, ctx: &mut dyn TransportContext, timer: TimerKind);
}

//! Channel abstraction for the simulated link.

use crate::error::RdtError;
use crate::types::{EventHandle, NodeId, VirtualTime};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static description of a lossy link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Probability in `[0, 1]` that a datagram is lost.
    pub loss_rate: f64,

    /// One-way propagation delay.
    pub propagation_delay: VirtualTime,
}

impl ChannelSpec {
    /// Checks that `loss_rate` is a probability.
    pub fn validate(&self) -> Result<(), RdtError> {
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(RdtError::invalid_argument(format!(
                "loss_rate must be in [0, 1], got {}",
                self.loss_rate
            )));
        }
        Ok(())
    }
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            propagation_delay: Duration::from_millis(2),
        }
    }
}

/// Sink for datagrams the channel decided to deliver.
///
/// Implemented by the simulation's event scheduler, so a channel can place a
/// delivery into virtual time without knowing anything else about the run.
pub trait DeliveryQueue {
    /// Schedules `datagram` to reach `to` after `delay`.
    fn deliver_after(
        &mut self,
        delay: VirtualTime,
        from: NodeId,
        to: NodeId,
        datagram: Vec<u8>,
    ) -> EventHandle;
}

/// An unreliable link between endpoints.
///
/// # Packet Flow
///
/// ```text
/// Sender                    Channel                   Receiver
///   |                          |                          |
///   |-- transmit(dg, to) ----->|-- Bernoulli(1 - loss) -->|
///   |                          |-- [propagation delay] -->|-- on_datagram
/// ```
pub trait Channel {
    /// Decides the datagram's fate once, at send time, and schedules delivery
    /// through `queue` if it survives.
    ///
    /// # Returns
    /// * `Ok(true)` - delivery scheduled
    /// * `Ok(false)` - datagram lost
    /// * `Err(RdtError::TransmissionFailure)` - the channel refused the datagram
    fn transmit(
        &mut self,
        queue: &mut dyn DeliveryQueue,
        datagram: Vec<u8>,
        from: NodeId,
        to: NodeId,
    ) -> Result<bool, RdtError>;

    /// The link's static parameters.
    fn spec(&self) -> ChannelSpec;
}

/// Fault injection for simulated channels.
pub trait NetworkController {
    /// Changes the loss probability for subsequent datagrams.
    fn set_loss_rate(&mut self, loss_rate: f64) -> Result<(), RdtError>;

    /// Drops the next `count` datagrams sent on the directed link `from -> to`,
    /// regardless of the loss rate.
    fn force_drop(&mut self, from: NodeId, to: NodeId, count: u32);

    /// Refuses the next `count` transmissions from any node.
    fn force_refuse(&mut self, count: u32);

    /// Takes the directed link `from -> to` down (transmissions are refused) or back up.
    fn set_link_up(&mut self, from: NodeId, to: NodeId, up: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_spec_validate() {
        assert!(ChannelSpec::default().validate().is_ok());

        let spec = ChannelSpec { loss_rate: 1.0, ..Default::default() };
        assert!(spec.validate().is_ok());

        let spec = ChannelSpec { loss_rate: 1.5, ..Default::default() };
        assert!(matches!(spec.validate(), Err(RdtError::InvalidArgument(_))));

        let spec = ChannelSpec { loss_rate: f64::NAN, ..Default::default() };
        assert!(spec.validate().is_err());
    }
}

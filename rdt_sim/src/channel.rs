//! Lossy point-to-point channel with fault injection.

use rand::distributions::{Bernoulli, Distribution};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rdt_env::{Channel, ChannelSpec, DeliveryQueue, NetworkController, NodeId, RdtError, VirtualTime};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, trace};

/// Per-channel delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Datagrams handed to `transmit`
    pub offered: u64,

    /// Datagrams scheduled for delivery
    pub delivered: u64,

    /// Datagrams lost to the Bernoulli trial
    pub dropped: u64,

    /// Datagrams lost to `force_drop`
    pub forced_drops: u64,

    /// Transmissions refused (link down or `force_refuse`)
    pub refused: u64,
}

/// Simulated link: independent per-datagram loss plus a fixed propagation delay.
///
/// The loss decision is a Bernoulli trial drawn from a seeded ChaCha8 RNG at
/// send time, so the same seed and the same traffic always lose the same
/// datagrams. Forced drops and refusals never consume randomness.
pub struct LossyChannel {
    spec: ChannelSpec,

    /// Drop distribution, `p = loss_rate`
    loss: Bernoulli,

    /// RNG for loss decisions (seeded, never global)
    rng: ChaCha8Rng,

    /// Optional link rate; adds `len * 8 / rate` seconds of serialization delay
    data_rate_bps: Option<u64>,

    /// Pending forced drops per directed link
    forced_drops: HashMap<(NodeId, NodeId), u32>,

    /// Pending forced refusals (any link)
    forced_refusals: u32,

    /// Directed links currently down
    links_down: HashSet<(NodeId, NodeId)>,

    stats: ChannelStats,
}

impl LossyChannel {
    /// Creates a channel from its spec and RNG seed.
    pub fn new(spec: ChannelSpec, seed: u64) -> Result<Self, RdtError> {
        spec.validate()?;
        let loss = Bernoulli::new(spec.loss_rate)
            .map_err(|e| RdtError::invalid_argument(format!("loss_rate: {e}")))?;

        Ok(Self {
            spec,
            loss,
            rng: ChaCha8Rng::seed_from_u64(seed),
            data_rate_bps: None,
            forced_drops: HashMap::new(),
            forced_refusals: 0,
            links_down: HashSet::new(),
            stats: ChannelStats::default(),
        })
    }

    /// Sets a link rate so larger datagrams take longer to arrive.
    pub fn with_data_rate(mut self, data_rate_bps: Option<u64>) -> Result<Self, RdtError> {
        if data_rate_bps == Some(0) {
            return Err(RdtError::invalid_argument("data rate must be positive"));
        }
        self.data_rate_bps = data_rate_bps;
        Ok(self)
    }

    /// Delivery counters.
    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Propagation delay plus serialization delay for a datagram of `len` bytes.
    pub fn delivery_delay(&self, len: usize) -> VirtualTime {
        let serialization = match self.data_rate_bps {
            Some(rate) => Duration::from_secs_f64(len as f64 * 8.0 / rate as f64),
            None => Duration::ZERO,
        };
        self.spec.propagation_delay + serialization
    }

    fn take_forced_drop(&mut self, from: NodeId, to: NodeId) -> bool {
        let key = (from, to);
        let Some(remaining) = self.forced_drops.get_mut(&key) else {
            return false;
        };
        *remaining -= 1;
        if *remaining == 0 {
            self.forced_drops.remove(&key);
        }
        true
    }
}

impl Channel for LossyChannel {
    fn transmit(
        &mut self,
        queue: &mut dyn DeliveryQueue,
        datagram: Vec<u8>,
        from: NodeId,
        to: NodeId,
    ) -> Result<bool, RdtError> {
        self.stats.offered += 1;

        if self.links_down.contains(&(from, to)) {
            self.stats.refused += 1;
            return Err(RdtError::transmission(format!("link {from} -> {to} is down")));
        }
        if self.forced_refusals > 0 {
            self.forced_refusals -= 1;
            self.stats.refused += 1;
            return Err(RdtError::transmission("channel refused datagram"));
        }

        // Draw first so forced drops don't shift the random sequence
        let lost = self.loss.sample(&mut self.rng);

        if self.take_forced_drop(from, to) {
            self.stats.forced_drops += 1;
            debug!(%from, %to, len = datagram.len(), "Datagram dropped (forced)");
            return Ok(false);
        }
        if lost {
            self.stats.dropped += 1;
            debug!(%from, %to, len = datagram.len(), "Datagram dropped");
            return Ok(false);
        }

        let delay = self.delivery_delay(datagram.len());
        trace!(%from, %to, len = datagram.len(), ?delay, "Datagram in flight");
        queue.deliver_after(delay, from, to, datagram);
        self.stats.delivered += 1;
        Ok(true)
    }

    fn spec(&self) -> ChannelSpec {
        self.spec
    }
}

impl NetworkController for LossyChannel {
    fn set_loss_rate(&mut self, loss_rate: f64) -> Result<(), RdtError> {
        let spec = ChannelSpec { loss_rate, ..self.spec };
        spec.validate()?;
        self.loss = Bernoulli::new(loss_rate)
            .map_err(|e| RdtError::invalid_argument(format!("loss_rate: {e}")))?;
        self.spec = spec;
        Ok(())
    }

    fn force_drop(&mut self, from: NodeId, to: NodeId, count: u32) {
        if count > 0 {
            *self.forced_drops.entry((from, to)).or_insert(0) += count;
        }
    }

    fn force_refuse(&mut self, count: u32) {
        self.forced_refusals += count;
    }

    fn set_link_up(&mut self, from: NodeId, to: NodeId, up: bool) {
        if up {
            self.links_down.remove(&(from, to));
        } else {
            self.links_down.insert((from, to));
        }
    }
}

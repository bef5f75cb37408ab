//! Common types for the reliable-transfer environment abstraction.

use crate::error::RdtError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Simulated clock value, measured from the start of the run.
///
/// Advanced only by the event scheduler; never tied to wall-clock time.
pub type VirtualTime = Duration;

/// Converts a delay given in seconds into a [`VirtualTime`] offset.
///
/// Negative, NaN and infinite delays are rejected with `InvalidArgument`.
pub fn delay_from_secs(secs: f64) -> Result<VirtualTime, RdtError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| RdtError::invalid_argument(format!("delay must be finite and >= 0, got {secs}")))
}

/// Unique identifier for a simulated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Creates a new random NodeId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic NodeId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 hex chars are enough to tell nodes apart in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Opaque reference to a scheduled event, used only to cancel it.
///
/// Handles order by fire time, then by insertion id, which is exactly the
/// order in which the scheduler executes events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHandle {
    time: VirtualTime,
    id: u64,
}

impl EventHandle {
    /// Builds a handle. Only schedulers should mint these.
    pub fn new(time: VirtualTime, id: u64) -> Self {
        Self { time, id }
    }

    /// Virtual time at which the event is due.
    pub fn fire_time(&self) -> VirtualTime {
        self.time
    }

    /// Insertion id, the FIFO tie-break among events due at the same time.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Timers an endpoint can arm through its [`crate::TransportContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Pacing timer: transmit the next fresh packet.
    SendNext,

    /// Retransmission timer for `seq`.
    ///
    /// `generation` is the sender's timer generation when the timer was armed;
    /// a fire whose generation no longer matches is stale and ignored.
    Retransmit { seq: u32, generation: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_seed_is_deterministic() {
        assert_eq!(NodeId::from_seed(7), NodeId::from_seed(7));
        assert_ne!(NodeId::from_seed(7), NodeId::from_seed(8));
    }

    #[test]
    fn test_delay_from_secs() {
        assert_eq!(delay_from_secs(0.5).unwrap(), Duration::from_millis(500));
        assert_eq!(delay_from_secs(0.0).unwrap(), Duration::ZERO);
        assert!(matches!(delay_from_secs(-0.1), Err(RdtError::InvalidArgument(_))));
        assert!(delay_from_secs(f64::NAN).is_err());
        assert!(delay_from_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_event_handle_ordering() {
        let early = EventHandle::new(Duration::from_secs(1), 5);
        let late = EventHandle::new(Duration::from_secs(2), 0);
        let tie = EventHandle::new(Duration::from_secs(1), 6);

        assert!(early < late);
        assert!(early < tie);
        assert!(tie < late);
    }
}

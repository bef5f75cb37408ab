//! Preset transfer scenarios.

use crate::config::SimConfig;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// RDT-001: 10% loss, 50 packets at 1 s, fixed pacing
    ReliableTransfer,

    /// RDT-002: No loss; every packet must arrive
    Lossless,

    /// RDT-003: Window-paced sending starting from 50 ms
    CongestionPacing,

    /// RDT-004: 30% loss in both directions
    LossyLink,

    /// RDT-005: First ACK dropped; sender retransmits into silence
    AckLoss,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ReliableTransfer,
            ScenarioId::Lossless,
            ScenarioId::CongestionPacing,
            ScenarioId::LossyLink,
            ScenarioId::AckLoss,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ReliableTransfer => "reliable_transfer",
            ScenarioId::Lossless => "lossless",
            ScenarioId::CongestionPacing => "congestion_pacing",
            ScenarioId::LossyLink => "lossy_link",
            ScenarioId::AckLoss => "ack_loss",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ReliableTransfer => "10% channel loss, 50 x 1024 B packets, 1 s interval, 0.5 s timeout",
            ScenarioId::Lossless => "Error-free channel, 20 packets, no retransmissions expected",
            ScenarioId::CongestionPacing => "Slow start / congestion avoidance pacing, 100 packets from 50 ms interval",
            ScenarioId::LossyLink => "30% loss on data and ACKs; delivery stays in order even once an ACK loss stalls the sender",
            ScenarioId::AckLoss => "Drop the first ACK: no cumulative ACK means the sender never recovers",
        }
    }

    /// Configuration for this scenario with the given seed.
    pub fn config(&self, seed: u64) -> SimConfig {
        let base = SimConfig {
            seed,
            ..Default::default()
        };
        match self {
            ScenarioId::ReliableTransfer => SimConfig {
                error_rate: 0.1,
                max_packets: 50,
                interval: 1.0,
                simulation_time: 30.0,
                congestion_control: false,
                ..base
            },
            ScenarioId::Lossless => SimConfig {
                error_rate: 0.0,
                max_packets: 20,
                ..base
            },
            ScenarioId::CongestionPacing => SimConfig {
                error_rate: 0.0,
                max_packets: 100,
                interval: 0.05,
                simulation_time: 20.0,
                congestion_control: true,
                ..base
            },
            ScenarioId::LossyLink => SimConfig {
                error_rate: 0.3,
                max_packets: 20,
                interval: 0.1,
                simulation_time: 60.0,
                congestion_control: false,
                ..base
            },
            ScenarioId::AckLoss => SimConfig {
                error_rate: 0.0,
                max_packets: 10,
                simulation_time: 10.0,
                ..base
            },
        }
    }

    /// True if the sender must reach its terminal state for the run to pass.
    pub fn expects_completion(&self) -> bool {
        matches!(self, ScenarioId::Lossless)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reliable_transfer" | "reliabletransfer" | "rdt-001" => Ok(ScenarioId::ReliableTransfer),
            "lossless" | "rdt-002" => Ok(ScenarioId::Lossless),
            "congestion_pacing" | "congestionpacing" | "rdt-003" => Ok(ScenarioId::CongestionPacing),
            "lossy_link" | "lossylink" | "rdt-004" => Ok(ScenarioId::LossyLink),
            "ack_loss" | "ackloss" | "rdt-005" => Ok(ScenarioId::AckLoss),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

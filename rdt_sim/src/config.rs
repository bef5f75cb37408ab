//! Run configuration.

use crate::congestion::CongestionParams;
use crate::sender::SenderConfig;
use rdt_env::{delay_from_secs, ChannelSpec, RdtError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a simulation run.
///
/// Times are in seconds of virtual time. Missing fields in a JSON config
/// take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Payload bytes per data packet
    pub packet_size: usize,

    /// Packets the sender transfers
    pub max_packets: u32,

    /// Gap between an ACK and the next send
    pub interval: f64,

    /// Retransmission timeout
    pub timeout: f64,

    /// Channel loss probability, applied to both directions
    pub error_rate: f64,

    /// Both endpoints stop here and the run ends
    pub simulation_time: f64,

    /// One-way propagation delay
    pub propagation_delay: f64,

    /// Link rate for serialization delay; `None` disables it
    pub data_rate_bps: Option<u64>,

    pub receiver_start: f64,

    pub sender_start: f64,

    /// Pace sends with the window controller
    pub congestion_control: bool,

    pub congestion: CongestionParams,

    /// Keep an in-memory packet trace
    pub trace: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            packet_size: 1024,
            max_packets: 100,
            interval: 1.0,
            timeout: 0.5,
            error_rate: 0.0,
            simulation_time: 30.0,
            propagation_delay: 0.002,
            data_rate_bps: Some(5_000_000),
            receiver_start: 1.0,
            sender_start: 2.0,
            congestion_control: true,
            congestion: CongestionParams::default(),
            trace: false,
        }
    }
}

impl SimConfig {
    /// Parses a (possibly partial) JSON config.
    pub fn from_json(json: &str) -> Result<Self, RdtError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RdtError::config(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field is in range.
    pub fn validate(&self) -> Result<(), RdtError> {
        if !(0.0..=1.0).contains(&self.error_rate) {
            return Err(RdtError::config(format!(
                "error_rate must be in [0, 1], got {}",
                self.error_rate
            )));
        }
        if !(self.timeout.is_finite() && self.timeout > 0.0) {
            return Err(RdtError::config(format!("timeout must be positive, got {}", self.timeout)));
        }
        if self.data_rate_bps == Some(0) {
            return Err(RdtError::config("data_rate_bps must be positive"));
        }

        for (name, value) in [
            ("interval", self.interval),
            ("simulation_time", self.simulation_time),
            ("propagation_delay", self.propagation_delay),
            ("receiver_start", self.receiver_start),
            ("sender_start", self.sender_start),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RdtError::config(format!("{name} must be >= 0, got {value}")));
            }
        }

        if self.congestion_control {
            self.congestion.validate()?;
        }
        Ok(())
    }

    /// Channel parameters shared by both directions.
    pub fn channel_spec(&self) -> Result<ChannelSpec, RdtError> {
        Ok(ChannelSpec {
            loss_rate: self.error_rate,
            propagation_delay: delay_from_secs(self.propagation_delay)?,
        })
    }

    /// Sender parameters.
    pub fn sender_config(&self) -> Result<SenderConfig, RdtError> {
        Ok(SenderConfig {
            packet_size: self.packet_size,
            max_packets: self.max_packets,
            interval: delay_from_secs(self.interval)?,
            timeout: delay_from_secs(self.timeout)?,
            start_delay: Duration::from_millis(100),
            congestion: self.congestion_control.then_some(self.congestion),
        })
    }

    /// Virtual time at which the run ends.
    pub fn end_time(&self) -> Result<Duration, RdtError> {
        delay_from_secs(self.simulation_time)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = error_rate;
        self
    }

    pub fn with_max_packets(mut self, max_packets: u32) -> Self {
        self.max_packets = max_packets;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

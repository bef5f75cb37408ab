//! Error types for the reliable-transfer environment layer.

use thiserror::Error;

/// Errors raised by the scheduler, the wire codec, the channel and endpoint setup.
///
/// Only `InvalidArgument`, `InvalidConfig` and `EndpointSetup` ever escape to the
/// orchestrator. The transport-level variants are absorbed where they happen and
/// surface as counters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RdtError {
    /// Caller passed a value outside the operation's domain (e.g. a negative delay).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Buffer too short to hold a transport header.
    #[error("Malformed header: expected {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },

    /// The channel refused to accept a datagram.
    #[error("Transmission failure: {0}")]
    TransmissionFailure(String),

    /// An endpoint could not be started (bind/peer/parameter problem).
    #[error("Endpoint setup failed: {0}")]
    EndpointSetup(String),

    /// Simulation configuration is out of range.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl RdtError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a transmission failure.
    pub fn transmission(msg: impl Into<String>) -> Self {
        Self::TransmissionFailure(msg.into())
    }

    /// Creates an endpoint setup error.
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::EndpointSetup(msg.into())
    }

    /// Creates a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// True for faults that abort an endpoint or a run rather than being absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EndpointSetup(_) | Self::InvalidConfig(_) | Self::InvalidArgument(_)
        )
    }
}

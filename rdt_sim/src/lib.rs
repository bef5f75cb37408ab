//! Deterministic simulation of stop-and-wait reliable transfer.
//!
//! A sender and a receiver exchange datagrams over a lossy link, all inside
//! virtual time. Nothing touches a real socket or a real clock, so a run is a
//! pure function of its [`SimConfig`].
//!
//! # Core Principle: Events Are Data
//!
//! - **Time**: advanced only by the [`EventScheduler`], in fire-time order with
//!   FIFO tie-break
//! - **Network**: a [`LossyChannel`] decides each datagram's fate at send time
//! - **Randomness**: every loss decision comes from a ChaCha8 RNG seeded from
//!   the config
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         SimWorld                          │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │ EventScheduler<SimEvent> (virtual clock + queue)    │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! │        │ Start/Stop/Timer          │ Deliver              │
//! │  ┌─────▼──────────┐  data   ┌──────▼───────────┐          │
//! │  │ ReliableSender │────────►│ ReliableReceiver │          │
//! │  │ + Window ctrl  │◄────────│                  │          │
//! │  └────────────────┘   ACK   └──────────────────┘          │
//! │             ▲   LossyChannel (Bernoulli loss)   ▲         │
//! │             └───────────────────────────────────┘         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use rdt_sim::{SimConfig, SimWorld, StatsContext};
//!
//! let config = SimConfig {
//!     max_packets: 5,
//!     ..Default::default()
//! };
//!
//! let stats = SimWorld::new(config).unwrap().run(StatsContext::new());
//! assert!(stats.runs()[0].completed);
//! ```

mod channel;
mod config;
mod congestion;
mod exporter;
mod receiver;
mod runner;
mod scheduler;
mod sender;
mod stats;
mod trace;
mod world;
pub mod scenarios;

#[cfg(test)]
mod testing;

pub use channel::{ChannelStats, LossyChannel};
pub use config::SimConfig;
pub use congestion::{CongestionMode, CongestionParams, WindowController, WindowUpdate};
pub use exporter::{ExportError, SimExport};
pub use receiver::{ReceiverCounters, ReceiverState, ReliableReceiver};
pub use runner::{ScenarioResult, ScenarioRunner, Sweep};
pub use scheduler::{EventScheduler, SchedulerStats};
pub use sender::{ConnectionState, ReliableSender, SenderConfig, SenderCounters, SenderPhase};
pub use stats::{mbps, RunReport, StatsContext, StatsTotals};
pub use trace::{PacketTrace, TraceEvent, TraceRecord};
pub use world::{NodeStatus, SimEvent, SimWorld};

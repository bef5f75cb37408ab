//! Reliable-Transfer Environment Abstraction Layer
//!
//! This crate holds everything the transport roles and the simulation share:
//!
//! - the fixed 9-byte wire header ([`ReliableHeader`], [`Packet`])
//! - virtual time, node ids and event handles
//! - the capability interfaces per role: [`Endpoint`] (sender/receiver),
//!   [`TransportContext`] (what an endpoint may do), [`Channel`] and
//!   [`NetworkController`] (the lossy link and its fault injection)
//! - the error type, [`RdtError`]
//!
//! # Example
//!
//! ```ignore
//! use rdt_env::{Endpoint, TransportContext, Packet, NodeId};
//!
//! fn ping(ctx: &mut dyn TransportContext, peer: NodeId) {
//!     let _ = ctx.transmit(peer, Packet::data(0, 64).encode());
//! }
//! ```

mod context;
mod error;
mod network;
mod packet;
mod types;

pub use context::{Endpoint, TransportContext, TransportEvent};
pub use error::RdtError;
pub use network::{Channel, ChannelSpec, DeliveryQueue, NetworkController};
pub use packet::{Packet, ReliableHeader, HEADER_LEN};
pub use types::{delay_from_secs, EventHandle, NodeId, TimerKind, VirtualTime};

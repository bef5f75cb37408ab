//! Wire format for the reliable-transfer header.
//!
//! Every datagram starts with a fixed 9-byte header in network byte order,
//! followed by an opaque payload:
//!
//! ```text
//!  0                   4                   8   9
//! +-------------------+-------------------+---+----------------
//! |  sequence_number  |    ack_number     | A |  payload ...
//! +-------------------+-------------------+---+----------------
//!        u32 BE              u32 BE        u8 (is_ack, 0|1)
//! ```

use crate::error::RdtError;

/// Serialized header length in bytes.
pub const HEADER_LEN: usize = 9;

/// The transport header carried by data packets and ACKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReliableHeader {
    /// Sequence number of a data packet (dense, starting at 0).
    pub sequence_number: u32,

    /// Sequence number being acknowledged (meaningful when `is_ack`).
    pub ack_number: u32,

    /// Distinguishes ACKs from data packets.
    pub is_ack: bool,
}

impl ReliableHeader {
    /// Header for a data packet.
    pub fn data(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            ack_number: 0,
            is_ack: false,
        }
    }

    /// Header for an ACK of `ack_number`.
    pub fn ack(ack_number: u32) -> Self {
        Self {
            sequence_number: 0,
            ack_number,
            is_ack: true,
        }
    }

    /// Encodes the header into its fixed 9-byte form.
    pub fn serialize(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        out[4..8].copy_from_slice(&self.ack_number.to_be_bytes());
        out[8] = u8::from(self.is_ack);
        out
    }

    /// Decodes a header from the front of `bytes`.
    ///
    /// Trailing bytes (the payload) are ignored. Any flag byte other than `1`
    /// reads as a data packet.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, RdtError> {
        if bytes.len() < HEADER_LEN {
            return Err(RdtError::MalformedHeader {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut seq = [0u8; 4];
        let mut ack = [0u8; 4];
        seq.copy_from_slice(&bytes[0..4]);
        ack.copy_from_slice(&bytes[4..8]);

        Ok(Self {
            sequence_number: u32::from_be_bytes(seq),
            ack_number: u32::from_be_bytes(ack),
            is_ack: bytes[8] == 1,
        })
    }
}

impl std::fmt::Display for ReliableHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Seq: {} Ack: {} IsAck: {}",
            self.sequence_number, self.ack_number, self.is_ack
        )
    }
}

/// A header plus its opaque payload.
///
/// Packets are transient: built by an endpoint, encoded into a datagram, and
/// moved into the channel. Nothing holds on to them after delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: ReliableHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// A data packet carrying `payload_len` zero bytes.
    pub fn data(sequence_number: u32, payload_len: usize) -> Self {
        Self {
            header: ReliableHeader::data(sequence_number),
            payload: vec![0u8; payload_len],
        }
    }

    /// An empty ACK packet.
    pub fn ack(ack_number: u32) -> Self {
        Self {
            header: ReliableHeader::ack(ack_number),
            payload: Vec::new(),
        }
    }

    /// Payload size in bytes (header excluded).
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Total on-wire size in bytes.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encodes header and payload into one datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&self.header.serialize());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Splits a datagram back into header and payload.
    pub fn decode(datagram: &[u8]) -> Result<Self, RdtError> {
        let header = ReliableHeader::deserialize(datagram)?;
        Ok(Self {
            header,
            payload: datagram[HEADER_LEN..].to_vec(),
        })
    }
}

//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (type, sequence number, checksum,
//!   payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`].
//! - Computing and verifying the CRC-32 checksum.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |   Sequence    |        Checksum (hi)          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Checksum (lo)          |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 6 bytes.
//!
//! The checksum covers `seq ‖ payload` only.  The type byte is outside the
//! checksum; an unknown type is rejected by [`decode`] instead.

use crate::error::PacketError;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 6;

const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_CHECKSUM: usize = 2;

/// Packet type carried in the first header byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data = 0,
    Syn = 1,
    Ack = 2,
    Fin = 3,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => PacketType::Data,
            1 => PacketType::Syn,
            2 => PacketType::Ack,
            3 => PacketType::Fin,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PacketType::Data => "DATA",
            PacketType::Syn => "SYN",
            PacketType::Ack => "ACK",
            PacketType::Fin => "FIN",
        };
        f.write_str(name)
    }
}

/// A decoded datagram: header fields plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub seq: u8,
    /// Checksum as carried on the wire.  [`Packet::new`] fills it in.
    pub checksum: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet and compute its checksum.
    pub fn new(kind: PacketType, seq: u8, payload: Vec<u8>) -> Self {
        let checksum = checksum(seq, &payload);
        Self {
            kind,
            seq,
            checksum,
            payload,
        }
    }

    /// Header-only control packet (SYN, ACK, FIN).
    pub fn control(kind: PacketType, seq: u8) -> Self {
        Self::new(kind, seq, Vec::new())
    }

    /// Serialise into a newly allocated byte vector.
    ///
    /// The stored `checksum` is written as-is, so a packet built by hand with
    /// a wrong checksum stays wrong on the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        buf[OFF_TYPE] = self.kind.to_u8();
        buf[OFF_SEQ] = self.seq;
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&self.checksum.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        buf
    }

    /// `true` when the stored checksum matches the recomputed one.
    pub fn verify(&self) -> bool {
        self.checksum == checksum(self.seq, &self.payload)
    }
}

/// Frame `payload` with a fresh checksum.
pub fn encode(kind: PacketType, seq: u8, payload: &[u8]) -> Vec<u8> {
    Packet::new(kind, seq, payload.to_vec()).encode()
}

/// Parse the header and payload without verifying the checksum.
///
/// Returns [`Err`] if `buf` is shorter than [`HEADER_LEN`] or the type byte
/// is unknown.
pub fn decode(buf: &[u8]) -> Result<Packet, PacketError> {
    if buf.len() < HEADER_LEN {
        return Err(PacketError::TooShort { len: buf.len() });
    }
    let kind =
        PacketType::from_u8(buf[OFF_TYPE]).ok_or(PacketError::UnknownType(buf[OFF_TYPE]))?;
    let mut sum = [0u8; 4];
    sum.copy_from_slice(&buf[OFF_CHECKSUM..OFF_CHECKSUM + 4]);

    Ok(Packet {
        kind,
        seq: buf[OFF_SEQ],
        checksum: u32::from_be_bytes(sum),
        payload: buf[HEADER_LEN..].to_vec(),
    })
}

/// Decode and verify in one step.  This is what both engines call on every
/// inbound datagram.
pub fn parse(buf: &[u8]) -> Result<Packet, PacketError> {
    let packet = decode(buf)?;
    if !packet.verify() {
        return Err(PacketError::ChecksumMismatch {
            expected: packet.checksum,
            actual: checksum(packet.seq, &packet.payload),
        });
    }
    Ok(packet)
}

/// CRC-32 (IEEE) over `seq ‖ payload`.
pub fn checksum(seq: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[seq]);
    hasher.update(payload);
    hasher.finalize()
}

/// `true` if `buf` is shorter than a header or its checksum does not match.
///
/// Only the checksum is consulted; an unknown type byte is caught later by
/// [`decode`].
pub fn is_corrupt(buf: &[u8]) -> bool {
    if buf.len() < HEADER_LEN {
        return true;
    }
    let mut sum = [0u8; 4];
    sum.copy_from_slice(&buf[OFF_CHECKSUM..OFF_CHECKSUM + 4]);
    u32::from_be_bytes(sum) != checksum(buf[OFF_SEQ], &buf[HEADER_LEN..])
}

//! Error types for the ARQ engine.
//!
//! Two layers:
//! - [`PacketError`]: a single datagram could not be interpreted.  These are
//!   never fatal; the engines log and discard the datagram.
//! - [`ArqError`]: connection-level outcomes surfaced to the caller.

use std::io;

use thiserror::Error;

use crate::state::ConnectionState;

/// Reasons a raw datagram is classified as corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Datagram shorter than the fixed 6-byte header.
    #[error("datagram too short: {len} bytes, header needs 6")]
    TooShort { len: usize },

    /// Type byte is not one of DATA / SYN / ACK / FIN.
    #[error("unknown packet type {0}")]
    UnknownType(u8),

    /// Embedded checksum disagrees with the recomputed CRC-32.
    #[error("checksum mismatch: header says {expected:#010x}, payload hashes to {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// Connection-level errors.
#[derive(Debug, Error)]
pub enum ArqError {
    /// No valid SYN-ACK arrived within the handshake wait.
    #[error("handshake timed out waiting for SYN-ACK")]
    HandshakeTimeout,

    /// The SYN-ACK arrived but failed verification.
    #[error("handshake rejected: corrupt SYN-ACK")]
    HandshakeRejected,

    /// No valid FIN-ACK arrived within the teardown wait.
    #[error("teardown timed out waiting for FIN-ACK")]
    DisconnectTimeout,

    /// Underlying socket failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A packet was retransmitted more times than the configured budget.
    #[error("chunk {seq} exceeded the retransmission budget")]
    RetriesExhausted { seq: u64 },

    /// The receiver saw no datagram within its idle timeout.
    #[error("receiver idle timeout")]
    IdleTimeout,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation attempted in the wrong connection state.
    #[error("operation requires state {expected}, connection is {actual}")]
    BadState {
        expected: ConnectionState,
        actual: ConnectionState,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ArqError>;

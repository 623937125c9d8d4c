//! Receive-side reassembly state machine.
//!
//! [`Reassembler`] turns a stream of raw datagrams into in-order chunks:
//!
//! - Corrupt datagrams are discarded silently.
//! - DATA with `seq == expected` is delivered, acknowledged, and followed by
//!   any contiguous run waiting in the reorder buffer.
//! - DATA ahead of `expected` is buffered (a later copy overwrites an earlier
//!   one) and acknowledged.
//! - DATA behind `expected` is a duplicate: re-acknowledged, never
//!   redelivered.
//! - SYN is answered with SYN-ACK, FIN with FIN-ACK, and FIN ends the
//!   session.  An ACK-type packet only completes the handshake.
//!
//! "Ahead" and "behind" are decided on the circular sequence space: with
//! `d = (seq - expected) mod M`, `0 < d < M/2` is ahead and everything else
//! is behind.  The sender never has more than `M/2` chunks in flight, so this
//! split is exact.
//!
//! Like the sender's window this module only manages state; socket I/O is
//! the job of [`crate::receiver`].

use std::collections::BTreeMap;

use crate::packet::{self, Packet, PacketType};

/// Counters kept by one receive session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Chunks handed to the application.
    pub delivered: u64,
    /// Out-of-order chunks placed in the reorder buffer.
    pub buffered: u64,
    /// DATA behind `expected`, acknowledged again but not delivered.
    pub duplicates: u64,
    /// Datagrams that failed to decode or verify.
    pub corrupt_discarded: u64,
    /// ACKs generated for DATA.
    pub acks_sent: u64,
}

/// What the caller should do after one datagram.
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    /// `false` when the datagram was corrupt and ignored.
    pub valid: bool,
    /// Packet to send back to the peer, if any.
    pub reply: Option<Packet>,
    /// Chunks now deliverable, in order.
    pub delivered: Vec<Vec<u8>>,
    /// FIN received; the session is over.
    pub finished: bool,
}

/// Where a DATA sequence number falls relative to `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    InOrder,
    Ahead,
    Behind,
}

#[derive(Debug)]
pub struct Reassembler {
    expected: u8,
    space: u16,
    /// Out-of-order payloads keyed by wire sequence number.
    buffer: BTreeMap<u8, Vec<u8>>,
    stats: ReceiverStats,
}

impl Reassembler {
    /// `max_sequence_number` must be in `2..=256`.
    pub fn new(max_sequence_number: u16) -> Self {
        Self {
            expected: 0,
            space: max_sequence_number,
            buffer: BTreeMap::new(),
            stats: ReceiverStats::default(),
        }
    }

    /// Sequence number of the next in-order chunk.
    pub fn expected_seq(&self) -> u8 {
        self.expected
    }

    /// Chunks currently waiting in the reorder buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Verify and interpret one raw datagram.
    pub fn on_datagram(&mut self, bytes: &[u8]) -> Step {
        let pkt = match packet::parse(bytes) {
            Ok(p) => p,
            Err(e) => {
                self.stats.corrupt_discarded += 1;
                log::debug!("[arq:rx] discarded: {e}");
                return Step::default();
            }
        };

        match pkt.kind {
            PacketType::Syn => {
                log::debug!("[arq:rx] ← SYN; → SYN-ACK");
                Step {
                    valid: true,
                    reply: Some(Packet::control(PacketType::Syn, pkt.seq)),
                    ..Step::default()
                }
            }
            PacketType::Ack => {
                log::debug!("[arq:rx] ← ACK; handshake complete");
                Step {
                    valid: true,
                    ..Step::default()
                }
            }
            PacketType::Fin => {
                log::debug!("[arq:rx] ← FIN; → FIN-ACK");
                Step {
                    valid: true,
                    reply: Some(Packet::control(PacketType::Fin, pkt.seq)),
                    finished: true,
                    ..Step::default()
                }
            }
            PacketType::Data => Step {
                valid: true,
                reply: Some(Packet::control(PacketType::Ack, pkt.seq)),
                delivered: self.on_data(pkt.seq, pkt.payload),
                finished: false,
            },
        }
    }

    /// Place one verified DATA payload.  Returns the chunks that became
    /// deliverable; the caller acknowledges `seq` in every case.
    pub fn on_data(&mut self, seq: u8, payload: Vec<u8>) -> Vec<Vec<u8>> {
        self.stats.acks_sent += 1;
        match self.position(seq) {
            Position::InOrder => {
                let mut delivered = vec![payload];
                self.advance();
                while let Some(next) = self.buffer.remove(&self.expected) {
                    delivered.push(next);
                    self.advance();
                }
                self.stats.delivered += delivered.len() as u64;
                log::debug!(
                    "[arq:rx] seq={seq} in order; delivered {}, expecting {}",
                    delivered.len(),
                    self.expected
                );
                delivered
            }
            Position::Ahead => {
                self.buffer.insert(seq, payload);
                self.stats.buffered += 1;
                log::debug!(
                    "[arq:rx] seq={seq} ahead of {}; buffered ({} waiting)",
                    self.expected,
                    self.buffer.len()
                );
                Vec::new()
            }
            Position::Behind => {
                self.stats.duplicates += 1;
                log::debug!("[arq:rx] seq={seq} duplicate; re-acking");
                Vec::new()
            }
        }
    }

    fn position(&self, seq: u8) -> Position {
        let seq = u16::from(seq);
        if seq >= self.space {
            return Position::Behind;
        }
        let d = (seq + self.space - u16::from(self.expected)) % self.space;
        if d == 0 {
            Position::InOrder
        } else if d < self.space / 2 {
            Position::Ahead
        } else {
            Position::Behind
        }
    }

    fn advance(&mut self) {
        self.expected = ((u16::from(self.expected) + 1) % self.space) as u8;
    }
}

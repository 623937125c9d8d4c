//! Channel impairment simulator.
//!
//! Real networks drop and damage datagrams.  To exercise the ARQ machinery
//! without depending on actual network conditions, every datagram the sender
//! emits passes through a [`Simulator`] first:
//!
//! | Fault       | Description                                             |
//! |-------------|---------------------------------------------------------|
//! | Loss        | Drop the datagram with probability `loss_probability`.  |
//! | Mutation    | Flip payload bits (single, burst, or scattered).        |
//! | Truncation  | Discard 1–8 trailing payload bits.                      |
//!
//! Loss is rolled first; a surviving datagram is then corrupted with
//! probability `corruption_probability`, picking mutation or truncation with
//! equal odds.  The 6-byte header is never touched, so every impaired
//! datagram fails [`crate::packet::is_corrupt`] at the far end.  If a
//! strategy happens to leave the checksum intact (e.g. truncation discarding
//! bits that were already zero) the simulator falls back to a single-bit flip,
//! which CRC-32 always detects.
//!
//! A datagram with an empty payload cannot be damaged without touching the
//! header, so a corruption roll on one is reported as a drop.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::{self, HEADER_LEN};

/// Fault-model parameters.
///
/// Probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpairmentConfig {
    /// Probability that a datagram is silently dropped.
    pub loss_probability: f64,
    /// Probability that a surviving datagram is corrupted or truncated.
    pub corruption_probability: f64,
    /// RNG seed; `None` draws one from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for ImpairmentConfig {
    fn default() -> Self {
        // Transparent pass-through.
        Self {
            loss_probability: 0.0,
            corruption_probability: 0.0,
            seed: None,
        }
    }
}

impl ImpairmentConfig {
    pub fn new(loss_probability: f64, corruption_probability: f64) -> Self {
        Self {
            loss_probability,
            corruption_probability,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// `true` when neither loss nor corruption can ever fire.
    pub fn is_transparent(&self) -> bool {
        self.loss_probability <= 0.0 && self.corruption_probability <= 0.0
    }
}

/// Which damage was applied to a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    SingleBit,
    Burst,
    Scattered,
    Truncate,
}

/// Outcome of passing one datagram through the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Deliver unchanged.
    Deliver(Vec<u8>),
    /// Deliver the damaged bytes.
    Corrupted(Vec<u8>, Corruption),
    /// Never reaches the wire.
    Dropped,
}

impl Verdict {
    /// Bytes to hand to the socket, if any.
    pub fn into_datagram(self) -> Option<Vec<u8>> {
        match self {
            Verdict::Deliver(bytes) | Verdict::Corrupted(bytes, _) => Some(bytes),
            Verdict::Dropped => None,
        }
    }
}

/// Running fault counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpairmentStats {
    pub passed: u64,
    pub dropped: u64,
    pub corrupted: u64,
}

/// A seeded fault injector.
#[derive(Debug)]
pub struct Simulator {
    config: ImpairmentConfig,
    rng: StdRng,
    stats: ImpairmentStats,
}

impl Simulator {
    pub fn new(config: ImpairmentConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            stats: ImpairmentStats::default(),
        }
    }

    pub fn config(&self) -> &ImpairmentConfig {
        &self.config
    }

    pub fn stats(&self) -> ImpairmentStats {
        self.stats
    }

    /// Roll loss, then corruption, for one encoded datagram.
    pub fn apply(&mut self, datagram: Vec<u8>) -> Verdict {
        if self.config.is_transparent() {
            self.stats.passed += 1;
            return Verdict::Deliver(datagram);
        }

        if self.rng.random::<f64>() < self.config.loss_probability {
            self.stats.dropped += 1;
            log::debug!("[arq:sim] dropped {} byte datagram", datagram.len());
            return Verdict::Dropped;
        }

        if self.rng.random::<f64>() < self.config.corruption_probability {
            return match self.corrupt(datagram) {
                Some((bytes, kind)) => {
                    self.stats.corrupted += 1;
                    log::debug!("[arq:sim] {kind:?} corruption applied");
                    Verdict::Corrupted(bytes, kind)
                }
                None => {
                    self.stats.dropped += 1;
                    log::debug!("[arq:sim] corruption roll on empty payload, dropped");
                    Verdict::Dropped
                }
            };
        }

        self.stats.passed += 1;
        Verdict::Deliver(datagram)
    }

    /// Damage the payload of `datagram`, leaving the header alone.
    ///
    /// Returns `None` when there is no payload to damage.
    pub fn corrupt(&mut self, datagram: Vec<u8>) -> Option<(Vec<u8>, Corruption)> {
        if datagram.len() <= HEADER_LEN {
            return None;
        }
        let (header, payload) = datagram.split_at(HEADER_LEN);
        let mut damaged = payload.to_vec();

        let mut kind = if self.rng.random_bool(0.5) {
            let bits = self.rng.random_range(1..=8);
            truncate_bits(&mut damaged, bits);
            Corruption::Truncate
        } else {
            match self.rng.random_range(0..3) {
                0 => {
                    flip_single_bit(&mut damaged, &mut self.rng);
                    Corruption::SingleBit
                }
                1 => {
                    burst_flip(&mut damaged, &mut self.rng);
                    Corruption::Burst
                }
                _ => {
                    scattered_flip(&mut damaged, &mut self.rng);
                    Corruption::Scattered
                }
            }
        };

        let mut out = header.to_vec();
        out.extend_from_slice(&damaged);

        if !packet::is_corrupt(&out) {
            // Strategy was a no-op on this payload; a single-bit error is
            // always caught by CRC-32.
            damaged = payload.to_vec();
            flip_single_bit(&mut damaged, &mut self.rng);
            out.truncate(HEADER_LEN);
            out.extend_from_slice(&damaged);
            kind = Corruption::SingleBit;
        }
        Some((out, kind))
    }
}

/// Toggle one random bit in one random byte.
pub fn flip_single_bit<R: Rng + ?Sized>(payload: &mut [u8], rng: &mut R) {
    if payload.is_empty() {
        return;
    }
    let idx = rng.random_range(0..payload.len());
    payload[idx] ^= 1 << rng.random_range(0..8u32);
}

/// XOR `0xFF` into up to three distinct byte positions.
pub fn burst_flip<R: Rng + ?Sized>(payload: &mut [u8], rng: &mut R) {
    let amount = payload.len().min(3);
    for idx in rand::seq::index::sample(rng, payload.len(), amount).iter() {
        payload[idx] ^= 0xFF;
    }
}

/// Flip one random bit in each of up to three random positions.  Positions
/// may repeat.
pub fn scattered_flip<R: Rng + ?Sized>(payload: &mut [u8], rng: &mut R) {
    if payload.is_empty() {
        return;
    }
    for _ in 0..payload.len().min(3) {
        let idx = rng.random_range(0..payload.len());
        payload[idx] ^= 1 << rng.random_range(0..8u32);
    }
}

/// Discard `bits` trailing bits.
///
/// The byte length becomes `ceil(remaining_bits / 8)` and the discarded bits
/// of a partial trailing byte are zeroed.  Removing more bits than the
/// payload holds leaves it empty.
pub fn truncate_bits(payload: &mut Vec<u8>, bits: usize) {
    let total = payload.len() * 8;
    if bits > total {
        payload.clear();
        return;
    }
    let remaining = total - bits;
    payload.truncate(remaining.div_ceil(8));
    let partial = remaining % 8;
    if partial != 0 {
        if let Some(last) = payload.last_mut() {
            *last &= (1u8 << partial) - 1;
        }
    }
}

//! Tunable parameters for both ends of a connection.
//!
//! Every knob is a plain public field with a [`Default`] matching the values
//! the protocol was tuned with.  Nothing here reads the environment or the
//! command line; the binary maps its flags onto these structs.

use std::time::Duration;

use crate::error::{ArqError, Result};
use crate::simulator::ImpairmentConfig;

/// Largest sequence space the 1-byte wire field can express.
pub const MAX_SEQ_SPACE: u16 = 256;

/// Sender-side configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ArqConfig {
    /// Congestion window at connection start (packets).
    pub initial_cwnd: f64,
    /// Slow-start threshold at connection start (packets).
    pub slow_start_threshold: f64,
    /// Per-packet retransmission timeout.
    pub retransmission_timeout: Duration,
    /// Probability an outgoing DATA datagram is dropped.
    pub loss_probability: f64,
    /// Probability a surviving DATA datagram is corrupted or truncated.
    pub corruption_probability: f64,
    /// Size of the sequence space; wire sequence numbers are `index % this`.
    pub max_sequence_number: u16,
    /// Bounded wait for the SYN-ACK.
    pub handshake_timeout: Duration,
    /// Bounded wait for the FIN-ACK.
    pub disconnect_timeout: Duration,
    /// Run inbound ACKs through the simulator as well.
    pub impair_acks: bool,
    /// Abandon the transfer once any packet has been retransmitted this many
    /// times.  `None` retries forever.
    pub max_retransmissions: Option<u32>,
    /// Seed for the simulator RNG.
    pub seed: Option<u64>,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            initial_cwnd: 1.0,
            slow_start_threshold: 16.0,
            retransmission_timeout: Duration::from_secs(1),
            loss_probability: 0.1,
            corruption_probability: 0.05,
            max_sequence_number: MAX_SEQ_SPACE,
            handshake_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(5),
            impair_acks: false,
            max_retransmissions: Some(50),
            seed: None,
        }
    }
}

impl ArqConfig {
    /// Defaults with the simulator switched off.
    pub fn reliable() -> Self {
        Self {
            loss_probability: 0.0,
            corruption_probability: 0.0,
            ..Self::default()
        }
    }

    /// Simulator parameters derived from this config.
    pub fn impairment(&self) -> ImpairmentConfig {
        ImpairmentConfig {
            loss_probability: self.loss_probability,
            corruption_probability: self.corruption_probability,
            seed: self.seed,
        }
    }

    /// Largest number of packets that may be in flight regardless of `cwnd`.
    ///
    /// Half the sequence space, so an 8-bit ack always names exactly one
    /// outstanding chunk and the receiver can tell "ahead" from "behind".
    pub fn window_limit(&self) -> usize {
        usize::from(self.max_sequence_number / 2)
    }

    pub fn validate(&self) -> Result<()> {
        check_probability("loss_probability", self.loss_probability)?;
        check_probability("corruption_probability", self.corruption_probability)?;
        if !(self.initial_cwnd >= 1.0) {
            return Err(invalid(format!("initial_cwnd must be >= 1, got {}", self.initial_cwnd)));
        }
        if !(self.slow_start_threshold >= 1.0) {
            return Err(invalid(format!(
                "slow_start_threshold must be >= 1, got {}",
                self.slow_start_threshold
            )));
        }
        check_seq_space(self.max_sequence_number)?;
        for (name, value) in [
            ("retransmission_timeout", self.retransmission_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("disconnect_timeout", self.disconnect_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Receiver-side configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub max_sequence_number: u16,
    /// Give up if no datagram arrives for this long.  `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Impair the receiver's own ACK / SYN-ACK / FIN-ACK datagrams.
    pub ack_impairment: Option<ImpairmentConfig>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            max_sequence_number: MAX_SEQ_SPACE,
            idle_timeout: None,
            ack_impairment: None,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<()> {
        check_seq_space(self.max_sequence_number)?;
        if let Some(imp) = &self.ack_impairment {
            check_probability("ack loss_probability", imp.loss_probability)?;
            check_probability("ack corruption_probability", imp.corruption_probability)?;
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("idle_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

fn check_probability(name: &str, p: f64) -> Result<()> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be in [0, 1], got {p}")))
    }
}

fn check_seq_space(n: u16) -> Result<()> {
    if (2..=MAX_SEQ_SPACE).contains(&n) {
        Ok(())
    } else {
        Err(invalid(format!("max_sequence_number must be in 2..=256, got {n}")))
    }
}

fn invalid(msg: String) -> ArqError {
    ArqError::InvalidConfig(msg)
}

//! AIMD congestion window.
//!
//! `cwnd` is kept as an `f64` so congestion avoidance can add `1/cwnd` per
//! ack; the transmitter only ever uses its integer part.

/// Congestion window and slow-start threshold for one connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Congestion {
    cwnd: f64,
    ssthresh: f64,
}

impl Congestion {
    /// `initial_cwnd` is clamped to at least one packet.
    pub fn new(initial_cwnd: f64, ssthresh: f64) -> Self {
        Self {
            cwnd: initial_cwnd.max(1.0),
            ssthresh: ssthresh.max(1.0),
        }
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    /// Packets the transmitter may have in flight: `floor(cwnd)`, at least 1.
    pub fn window(&self) -> usize {
        (self.cwnd.floor() as usize).max(1)
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// Growth on a newly accepted ack.
    pub fn on_ack(&mut self) {
        if self.in_slow_start() {
            self.cwnd += 1.0;
        } else {
            self.cwnd += 1.0 / self.cwnd;
        }
    }

    /// Collapse on a retransmission timeout.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2.0).floor().max(1.0);
        self.cwnd = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_adds_one_per_ack() {
        let mut c = Congestion::new(1.0, 16.0);
        for _ in 0..10 {
            c.on_ack();
        }
        assert_eq!(c.cwnd(), 11.0);
        assert!(c.in_slow_start());
    }

    #[test]
    fn switches_to_additive_increase_at_threshold() {
        let mut c = Congestion::new(1.0, 16.0);
        for _ in 0..15 {
            c.on_ack();
        }
        assert_eq!(c.cwnd(), 16.0);
        assert!(!c.in_slow_start());

        c.on_ack();
        assert!((c.cwnd() - (16.0 + 1.0 / 16.0)).abs() < 1e-12);
        assert_eq!(c.window(), 16);
    }

    #[test]
    fn timeout_halves_threshold_and_resets_window() {
        let mut c = Congestion::new(1.0, 16.0);
        for _ in 0..8 {
            c.on_ack();
        }
        assert_eq!(c.cwnd(), 9.0);
        c.on_timeout();
        assert_eq!(c.cwnd(), 1.0);
        assert_eq!(c.ssthresh(), 4.0);
    }

    #[test]
    fn threshold_never_drops_below_one() {
        let mut c = Congestion::new(1.0, 16.0);
        c.on_timeout();
        assert_eq!(c.ssthresh(), 1.0);
        c.on_timeout();
        assert_eq!(c.ssthresh(), 1.0);
        assert_eq!(c.window(), 1);
    }

    #[test]
    fn fractional_threshold_uses_floor() {
        let mut c = Congestion::new(1.0, 2.0);
        c.on_ack(); // 2.0, congestion avoidance from here on
        c.on_ack(); // 2.5
        c.on_timeout();
        assert_eq!(c.ssthresh(), 1.0);
    }

    #[test]
    fn initial_cwnd_is_clamped() {
        let c = Congestion::new(0.2, 16.0);
        assert_eq!(c.cwnd(), 1.0);
    }
}

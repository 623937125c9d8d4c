//! Sender sliding window.
//!
//! [`SendWindow`] tracks which chunks are in flight, which of them have been
//! acknowledged, and the AIMD [`Congestion`] state that bounds how many may
//! be outstanding.  It performs no I/O and spawns nothing; the engine in
//! [`crate::sender`] calls it while holding the connection lock.
//!
//! # Index layout
//!
//! Chunks are addressed by their position in the application's chunk list
//! (`u64`, never wraps).  Only the wire sees `index % max_sequence_number`.
//!
//! ```text
//!   base                 next
//!     │                    │
//!  ───┼──P──A──P──P────────┼─────────────────▶ chunk index
//!     │ <── in flight ───▶ │ <── sendable while next < base + capacity
//! ```
//!
//! `P` = pending, `A` = acknowledged but not yet contiguous with `base`.
//!
//! # Ack semantics
//!
//! Acks are selective: an ack names one chunk.  The window slides one entry
//! at a time, and only while the entry at `base` is acknowledged, so an ack
//! for a far-future chunk never skips an unacknowledged gap.

use std::collections::BTreeMap;

use crate::config::ArqConfig;
use crate::congestion::Congestion;
use crate::timer::TimerHandle;

/// Acknowledgment state of one in-flight chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Acked,
}

/// One slot in the window.
#[derive(Debug)]
pub struct WindowEntry {
    pub payload: Vec<u8>,
    pub state: AckState,
    /// Times this chunk has been handed to the simulator (1 = first send).
    pub transmissions: u32,
    /// Armed retransmission timer while `Pending`.
    pub timer: Option<TimerHandle>,
}

/// Result of feeding one ack to the window.
#[derive(Debug)]
pub enum AckOutcome {
    /// The sequence number names nothing in flight.
    Unknown,
    /// The chunk was already acknowledged.
    Duplicate { index: u64 },
    /// Newly acknowledged.  `timer` is the handle the caller must cancel.
    Accepted {
        index: u64,
        slid: usize,
        timer: Option<TimerHandle>,
    },
}

/// Result of a retransmission timer firing.
#[derive(Debug, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The chunk was acknowledged (or slid past) before the timer won the lock.
    Stale,
    /// Resend `payload` under wire sequence `seq`.
    Retransmit { seq: u8, payload: Vec<u8> },
    /// The chunk has used up its retransmission budget.
    Exhausted { index: u64 },
}

/// Selective-ack sliding window with AIMD sizing.
#[derive(Debug)]
pub struct SendWindow {
    base: u64,
    next: u64,
    total: u64,
    entries: BTreeMap<u64, WindowEntry>,
    congestion: Congestion,
    seq_space: u64,
    limit: usize,
    max_retransmissions: Option<u32>,
}

impl SendWindow {
    pub fn new(total: u64, config: &ArqConfig) -> Self {
        Self {
            base: 0,
            next: 0,
            total,
            entries: BTreeMap::new(),
            congestion: Congestion::new(config.initial_cwnd, config.slow_start_threshold),
            seq_space: u64::from(config.max_sequence_number),
            limit: config.window_limit().max(1),
            max_retransmissions: config.max_retransmissions,
        }
    }

    /// Continue numbering at `first` instead of zero, so a later transfer on
    /// the same connection picks up where the receiver expects it.
    pub fn starting_at(mut self, first: u64) -> Self {
        self.base = first;
        self.next = first;
        self.total += first;
        self
    }

    /// Oldest unacknowledged chunk index.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Index the next new chunk will get.
    pub fn next_index(&self) -> u64 {
        self.next
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Entries currently held (pending plus acked-but-not-slid).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every chunk acknowledged and slid out.
    pub fn is_complete(&self) -> bool {
        self.base == self.total && self.entries.is_empty()
    }

    pub fn congestion(&self) -> &Congestion {
        &self.congestion
    }

    /// Effective window: `floor(cwnd)` capped at half the sequence space.
    pub fn capacity(&self) -> usize {
        self.congestion.window().min(self.limit)
    }

    /// `true` when another new chunk may be transmitted now.
    pub fn can_send(&self) -> bool {
        self.next < self.total && self.next < self.base + self.capacity() as u64
    }

    pub fn wire_seq(&self, index: u64) -> u8 {
        (index % self.seq_space) as u8
    }

    pub fn entry(&self, index: u64) -> Option<&WindowEntry> {
        self.entries.get(&index)
    }

    /// Iterate over in-flight chunk indices, oldest first.
    pub fn indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    /// Place the next chunk into the window as pending.
    ///
    /// Returns `(index, wire_seq)`.  Check [`can_send`] first.
    ///
    /// [`can_send`]: SendWindow::can_send
    pub fn record_sent(&mut self, payload: Vec<u8>) -> (u64, u8) {
        debug_assert!(
            self.can_send(),
            "record_sent on a full window ({} in flight, capacity {})",
            self.entries.len(),
            self.capacity()
        );
        let index = self.next;
        self.entries.insert(
            index,
            WindowEntry {
                payload,
                state: AckState::Pending,
                transmissions: 1,
                timer: None,
            },
        );
        self.next += 1;
        (index, self.wire_seq(index))
    }

    /// Attach a freshly armed timer to `index`.
    ///
    /// If the chunk is gone or already acknowledged the timer is handed
    /// back so the caller can cancel it.
    pub fn set_timer(&mut self, index: u64, timer: TimerHandle) -> Option<TimerHandle> {
        match self.entries.get_mut(&index) {
            Some(entry) if entry.state == AckState::Pending => entry.timer.replace(timer),
            _ => Some(timer),
        }
    }

    /// Map an 8-bit wire sequence number back to the in-flight chunk index.
    ///
    /// Unambiguous because at most half the sequence space is in flight.
    pub fn resolve(&self, seq: u8) -> Option<u64> {
        let seq = u64::from(seq);
        if seq >= self.seq_space {
            return None;
        }
        let offset = (seq + self.seq_space - self.base % self.seq_space) % self.seq_space;
        let index = self.base + offset;
        (index < self.next).then_some(index)
    }

    /// Process one ack for wire sequence `seq`.
    pub fn on_ack(&mut self, seq: u8) -> AckOutcome {
        let Some(index) = self.resolve(seq) else {
            return AckOutcome::Unknown;
        };
        let Some(entry) = self.entries.get_mut(&index) else {
            return AckOutcome::Unknown;
        };
        if entry.state == AckState::Acked {
            return AckOutcome::Duplicate { index };
        }

        entry.state = AckState::Acked;
        let timer = entry.timer.take();
        self.congestion.on_ack();

        let mut slid = 0;
        while self
            .entries
            .get(&self.base)
            .is_some_and(|e| e.state == AckState::Acked)
        {
            self.entries.remove(&self.base);
            self.base += 1;
            slid += 1;
        }

        AckOutcome::Accepted { index, slid, timer }
    }

    /// Handle expiry of the timer for `index`.
    ///
    /// On a live chunk this counts the retransmission and collapses the
    /// congestion window.  The caller re-arms the timer via [`set_timer`].
    ///
    /// [`set_timer`]: SendWindow::set_timer
    pub fn on_timeout(&mut self, index: u64) -> TimeoutOutcome {
        let seq = self.wire_seq(index);
        let budget = self.max_retransmissions;
        let Some(entry) = self.entries.get_mut(&index) else {
            return TimeoutOutcome::Stale;
        };
        if entry.state == AckState::Acked {
            return TimeoutOutcome::Stale;
        }
        // The timer that fired is spent.
        entry.timer = None;
        if budget.is_some_and(|max| entry.transmissions > max) {
            return TimeoutOutcome::Exhausted { index };
        }

        entry.transmissions += 1;
        let payload = entry.payload.clone();
        self.congestion.on_timeout();
        TimeoutOutcome::Retransmit { seq, payload }
    }

    /// Take every armed timer out of the window, e.g. on abort.
    pub fn take_timers(&mut self) -> Vec<TimerHandle> {
        self.entries
            .values_mut()
            .filter_map(|e| e.timer.take())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(total: u64, initial_cwnd: f64) -> SendWindow {
        let config = ArqConfig {
            initial_cwnd,
            ..ArqConfig::reliable()
        };
        SendWindow::new(total, &config)
    }

    fn fill(w: &mut SendWindow) -> Vec<u64> {
        let mut sent = Vec::new();
        while w.can_send() {
            let (idx, _) = w.record_sent(format!("chunk-{}", w.next_index()).into_bytes());
            sent.push(idx);
        }
        sent
    }

    fn assert_invariant(w: &SendWindow) {
        let cwnd = w.congestion().cwnd();
        assert!(w.len() as f64 <= cwnd.ceil());
        for idx in w.indices() {
            assert!(w.base() <= idx && (idx as f64) < w.base() as f64 + cwnd);
        }
    }

    #[test]
    fn initial_window_holds_one_packet() {
        let mut w = window(5, 1.0);
        assert_eq!(fill(&mut w), vec![0]);
        assert!(!w.can_send());
        assert_eq!(w.base(), 0);
    }

    #[test]
    fn in_order_acks_slide_and_grow() {
        let mut w = window(3, 1.0);
        for i in 0..3u8 {
            fill(&mut w);
            assert_invariant(&w);
            match w.on_ack(i) {
                AckOutcome::Accepted { slid, .. } => assert_eq!(slid, 1),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(w.is_complete());
        assert_eq!(w.base(), 3);
    }

    #[test]
    fn out_of_order_ack_does_not_slide() {
        let mut w = window(4, 3.0);
        assert_eq!(fill(&mut w), vec![0, 1, 2]);

        match w.on_ack(2) {
            AckOutcome::Accepted { index, slid, .. } => {
                assert_eq!(index, 2);
                assert_eq!(slid, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(w.base(), 0);
        assert_eq!(w.entry(2).unwrap().state, AckState::Acked);

        // Acking 0 slides one step; 1 is still pending, so 2 stays put.
        match w.on_ack(0) {
            AckOutcome::Accepted { slid, .. } => assert_eq!(slid, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(w.base(), 1);

        match w.on_ack(1) {
            AckOutcome::Accepted { slid, .. } => assert_eq!(slid, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(w.base(), 3);
        assert!(w.is_empty());
    }

    #[test]
    fn duplicate_ack_does_not_grow_cwnd() {
        let mut w = window(4, 2.0);
        fill(&mut w);
        w.on_ack(1);
        let cwnd = w.congestion().cwnd();
        assert!(matches!(w.on_ack(1), AckOutcome::Duplicate { index: 1 }));
        assert_eq!(w.congestion().cwnd(), cwnd);
    }

    #[test]
    fn ack_for_unsent_chunk_is_unknown() {
        let mut w = window(10, 1.0);
        fill(&mut w);
        assert!(matches!(w.on_ack(5), AckOutcome::Unknown));
        assert_eq!(w.base(), 0);
    }

    #[test]
    fn ack_after_slide_is_unknown() {
        let mut w = window(2, 1.0);
        fill(&mut w);
        w.on_ack(0);
        assert!(matches!(w.on_ack(0), AckOutcome::Unknown));
    }

    #[test]
    fn timeout_retransmits_same_payload_and_collapses() {
        let mut w = window(4, 4.0);
        fill(&mut w);
        w.on_ack(1);
        assert_eq!(w.congestion().cwnd(), 5.0);

        let outcome = w.on_timeout(0);
        assert_eq!(
            outcome,
            TimeoutOutcome::Retransmit {
                seq: 0,
                payload: b"chunk-0".to_vec()
            }
        );
        assert_eq!(w.congestion().cwnd(), 1.0);
        assert_eq!(w.congestion().ssthresh(), 2.0);
        assert_eq!(w.entry(0).unwrap().transmissions, 2);
        assert!(!w.can_send());
    }

    #[test]
    fn timeout_after_ack_is_stale() {
        let mut w = window(2, 2.0);
        fill(&mut w);
        w.on_ack(1);
        assert_eq!(w.on_timeout(1), TimeoutOutcome::Stale);
        w.on_ack(0);
        assert_eq!(w.on_timeout(0), TimeoutOutcome::Stale);
        assert_eq!(w.congestion().cwnd(), 4.0);
    }

    #[test]
    fn retransmission_budget_is_enforced() {
        let config = ArqConfig {
            max_retransmissions: Some(2),
            ..ArqConfig::reliable()
        };
        let mut w = SendWindow::new(1, &config);
        fill(&mut w);
        assert!(matches!(w.on_timeout(0), TimeoutOutcome::Retransmit { .. }));
        assert!(matches!(w.on_timeout(0), TimeoutOutcome::Retransmit { .. }));
        assert_eq!(w.on_timeout(0), TimeoutOutcome::Exhausted { index: 0 });
    }

    #[test]
    fn wire_sequence_wraps_and_resolves() {
        let config = ArqConfig {
            initial_cwnd: 8.0,
            ..ArqConfig::reliable()
        };
        let mut w = SendWindow::new(300, &config);
        // Walk the window up to the wrap point.
        for seq in 0..=250u8 {
            fill(&mut w);
            w.on_ack(seq);
        }
        fill(&mut w);
        let in_flight: Vec<u64> = w.indices().collect();
        assert!(in_flight.iter().any(|i| *i >= 256));
        for idx in in_flight {
            assert_eq!(w.resolve(w.wire_seq(idx)), Some(idx));
        }
        assert_eq!(w.wire_seq(256), 0);
    }

    #[test]
    fn resumed_window_continues_wire_sequence() {
        let mut w = window(2, 2.0).starting_at(255);
        assert_eq!(w.base(), 255);
        assert_eq!(w.total(), 257);
        let (idx, seq) = w.record_sent(b"x".to_vec());
        assert_eq!((idx, seq), (255, 255));
        let (idx, seq) = w.record_sent(b"y".to_vec());
        assert_eq!((idx, seq), (256, 0));
        w.on_ack(0);
        w.on_ack(255);
        assert!(w.is_complete());
    }

    #[test]
    fn window_never_exceeds_half_sequence_space() {
        let config = ArqConfig {
            initial_cwnd: 500.0,
            slow_start_threshold: 1000.0,
            ..ArqConfig::reliable()
        };
        let mut w = SendWindow::new(1000, &config);
        assert_eq!(fill(&mut w).len(), 128);
    }

    #[test]
    fn shuffled_and_repeated_acks_slide_to_oldest_gap() {
        use std::collections::BTreeSet;

        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::{Rng, SeedableRng};

        for (space, seed) in [(8u16, 1u64), (8, 2), (256, 3), (256, 4)] {
            let config = ArqConfig {
                max_sequence_number: space,
                initial_cwnd: 2.0,
                slow_start_threshold: 64.0,
                ..ArqConfig::reliable()
            };
            let half = u64::from(space / 2);
            let mut w = SendWindow::new(300, &config);
            let mut rng = StdRng::seed_from_u64(seed);
            let mut acked = BTreeSet::new();
            let mut oldest_gap = 0u64;

            while !w.is_complete() {
                fill(&mut w);
                assert!(w.len() <= w.capacity());
                assert!(w.capacity() as u64 <= half);
                for idx in w.indices() {
                    assert!(w.base() <= idx && idx < w.base() + w.capacity() as u64);
                }

                let mut pending: Vec<u64> = w.indices().filter(|i| !acked.contains(i)).collect();
                pending.shuffle(&mut rng);
                let take = rng.random_range(1..=pending.len());
                for &idx in &pending[..take] {
                    match w.on_ack(w.wire_seq(idx)) {
                        AckOutcome::Accepted { index, .. } => assert_eq!(index, idx),
                        other => panic!("space {space}: ack for {idx} gave {other:?}"),
                    }
                    acked.insert(idx);
                    while acked.contains(&oldest_gap) {
                        oldest_gap += 1;
                    }
                    assert_eq!(w.base(), oldest_gap);

                    // Repeat an ack from at most half a sequence space back.
                    if rng.random_bool(0.4) {
                        let recent: Vec<u64> = acked
                            .range(w.base().saturating_sub(half)..)
                            .copied()
                            .collect();
                        let dup = recent[rng.random_range(0..recent.len())];
                        let cwnd = w.congestion().cwnd();
                        let outcome = w.on_ack(w.wire_seq(dup));
                        if dup >= w.base() {
                            assert!(matches!(outcome, AckOutcome::Duplicate { index } if index == dup));
                        } else {
                            assert!(matches!(outcome, AckOutcome::Unknown));
                        }
                        assert_eq!(w.congestion().cwnd(), cwnd);
                        assert_eq!(w.base(), oldest_gap);
                    }
                }
            }
            assert_eq!(w.base(), 300);
            assert!(w.is_empty());
        }
    }

    #[test]
    fn growth_keeps_window_invariant() {
        let mut w = window(200, 1.0);
        let mut seq = 0u64;
        while !w.is_complete() {
            fill(&mut w);
            assert_invariant(&w);
            w.on_ack(w.wire_seq(seq));
            seq += 1;
        }
        assert_eq!(w.base(), 200);
    }
}

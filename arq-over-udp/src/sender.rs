//! Sender window engine.
//!
//! # Architecture
//!
//! ```text
//!            chunks
//!              │
//!   ┌──────────▼──────────┐   wake (Notify)   ┌──────────────────┐
//!   │   transmit loop     │◀──────────────────│    ack loop      │◀── ACKs
//!   │ (caller's task)     │                   │  (tokio task)    │
//!   └──────────┬──────────┘                   └────────┬─────────┘
//!              │ record + arm                          │ mark acked, slide,
//!              ▼                                       ▼ cancel timer
//!   ┌────────────────────────────────────────────────────────────┐
//!   │  Mutex<Inner>:  SendWindow + Congestion + Simulator + stats│
//!   └────────────────────────────────────────────────────────────┘
//!              ▲
//!              │ re-check, retransmit, collapse cwnd, re-arm
//!   ┌──────────┴──────────┐
//!   │ per-packet timers   │  (one tokio task per in-flight chunk)
//!   └─────────────────────┘
//! ```
//!
//! The lock is a `std::sync::Mutex` and is only ever held inside synchronous
//! sections: every decision (what to send, how to impair it, which timer to
//! arm or cancel) is made under the lock, and the resulting datagrams are
//! written to the socket after it is released.
//!
//! # Usage
//!
//! ```ignore
//! let mut conn = Connection::new(socket, peer, ArqConfig::reliable())?;
//! conn.connect().await?;
//! let report = conn.transfer(chunks).await?;
//! conn.close().await?;
//! ```
//!
//! or simply [`send_all`].

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::ArqConfig;
use crate::error::{ArqError, Result};
use crate::handshake;
use crate::packet::{self, PacketType};
use crate::simulator::{ImpairmentStats, Simulator, Verdict};
use crate::socket::Socket;
use crate::state::ConnectionState;
use crate::timer::TimerHandle;
use crate::window::{AckOutcome, SendWindow, TimeoutOutcome};

// ---------------------------------------------------------------------------
// TransferReport
// ---------------------------------------------------------------------------

/// Summary of one data phase.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    /// Number of application chunks handed to [`Connection::transfer`].
    pub chunks: u64,
    /// Window base at completion.  Counts every chunk sent on the
    /// connection, so it equals `chunks` only for the first transfer.
    pub base: u64,
    /// In-flight entries left at completion (zero on success).
    pub window_len: usize,
    /// DATA datagrams handed to the simulator, including retransmissions.
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    /// ACKs that acknowledged a chunk for the first time.
    pub acks_accepted: u64,
    /// ACKs for chunks already acknowledged, or already slid past.
    pub duplicate_acks: u64,
    /// Inbound datagrams that failed verification.
    pub corrupt_acks: u64,
    /// Fault counters of the DATA-path simulator.
    pub impairment: ImpairmentStats,
    pub final_cwnd: f64,
    pub final_ssthresh: f64,
    pub elapsed: Duration,
    /// `false` if the FIN-ACK never arrived.  Set by [`send_all`].
    pub closed_cleanly: bool,
}

#[derive(Debug, Default)]
struct Counters {
    packets_sent: u64,
    retransmissions: u64,
    timeouts: u64,
    acks_accepted: u64,
    duplicate_acks: u64,
    corrupt_acks: u64,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Inner {
    window: SendWindow,
    simulator: Simulator,
    /// Present when `impair_acks` is set.
    ack_simulator: Option<Simulator>,
    stats: Counters,
    /// Index of a chunk that ran out of retransmissions.
    exhausted: Option<u64>,
    /// Set once the transfer is over; late timer callbacks become no-ops.
    stopped: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Notify,
    socket: Arc<Socket>,
    peer: SocketAddr,
    rto: Duration,
}

impl Shared {
    fn new(socket: Arc<Socket>, peer: SocketAddr, config: &ArqConfig, window: SendWindow) -> Self {
        let ack_simulator = config.impair_acks.then(|| {
            let mut imp = config.impairment();
            imp.seed = imp.seed.map(|s| s.wrapping_add(1));
            Simulator::new(imp)
        });
        Self {
            inner: Mutex::new(Inner {
                window,
                simulator: Simulator::new(config.impairment()),
                ack_simulator,
                stats: Counters::default(),
                exhausted: None,
                stopped: false,
            }),
            wake: Notify::new(),
            socket,
            peer,
            rto: config.retransmission_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write an already-impaired datagram.  Send errors are logged only: the
    /// chunk stays in the window and its timer will retry it.
    async fn transmit(&self, seq: u8, verdict: Verdict) {
        let bytes = match verdict {
            Verdict::Dropped => {
                log::debug!("[arq:tx] DATA seq={seq} lost in simulator");
                return;
            }
            Verdict::Corrupted(bytes, kind) => {
                log::debug!("[arq:tx] DATA seq={seq} sent with {kind:?} damage");
                bytes
            }
            Verdict::Deliver(bytes) => bytes,
        };
        if let Err(e) = self.socket.send_to(&bytes, self.peer).await {
            log::warn!("[arq:tx] send of seq={seq} failed: {e}; will retry on timeout");
        }
    }

    /// Interpret one inbound datagram.  Returns `true` once every chunk has
    /// been acknowledged.
    fn handle_datagram(&self, bytes: Vec<u8>) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let bytes = match inner.ack_simulator.as_mut() {
            Some(sim) => match sim.apply(bytes).into_datagram() {
                Some(b) => b,
                None => return inner.window.is_complete(),
            },
            None => bytes,
        };

        let ack = match packet::parse(&bytes) {
            Ok(p) if p.kind == PacketType::Ack => p,
            Ok(p) => {
                log::debug!("[arq:ack] ignoring {} seq={}", p.kind, p.seq);
                return inner.window.is_complete();
            }
            Err(e) => {
                inner.stats.corrupt_acks += 1;
                log::debug!("[arq:ack] discarded: {e}");
                return inner.window.is_complete();
            }
        };

        match inner.window.on_ack(ack.seq) {
            AckOutcome::Accepted { index, slid, timer } => {
                if let Some(timer) = timer {
                    timer.cancel();
                }
                inner.stats.acks_accepted += 1;
                let cc = inner.window.congestion();
                log::debug!(
                    "[arq:ack] ← ACK seq={} idx={index} slid={slid} base={} cwnd={:.2} ssthresh={}",
                    ack.seq,
                    inner.window.base(),
                    cc.cwnd(),
                    cc.ssthresh()
                );
                if slid > 0 {
                    self.wake.notify_one();
                }
            }
            AckOutcome::Duplicate { index } => {
                inner.stats.duplicate_acks += 1;
                log::debug!("[arq:ack] duplicate ACK seq={} idx={index}", ack.seq);
            }
            AckOutcome::Unknown => {
                inner.stats.duplicate_acks += 1;
                log::debug!("[arq:ack] ACK seq={} matches nothing in flight", ack.seq);
            }
        }
        inner.window.is_complete()
    }

    fn report(&self, chunks: u64, elapsed: Duration) -> TransferReport {
        let inner = self.lock();
        let cc = inner.window.congestion();
        TransferReport {
            chunks,
            base: inner.window.base(),
            window_len: inner.window.len(),
            packets_sent: inner.stats.packets_sent,
            retransmissions: inner.stats.retransmissions,
            timeouts: inner.stats.timeouts,
            acks_accepted: inner.stats.acks_accepted,
            duplicate_acks: inner.stats.duplicate_acks,
            corrupt_acks: inner.stats.corrupt_acks,
            impairment: inner.simulator.stats(),
            final_cwnd: cc.cwnd(),
            final_ssthresh: cc.ssthresh(),
            elapsed,
            closed_cleanly: false,
        }
    }
}

/// Owns the background work of one transfer: the ack task and, through the
/// window, every armed timer.  Dropping it stops all of them, so a cancelled
/// `transfer` future leaves nothing running.
struct TransferTasks {
    shared: Arc<Shared>,
    acks: Option<JoinHandle<()>>,
}

impl TransferTasks {
    fn spawn(shared: &Arc<Shared>) -> Self {
        Self {
            shared: Arc::clone(shared),
            acks: Some(tokio::spawn(ack_loop(Arc::clone(shared)))),
        }
    }

    /// Cancel every timer and the ack task.  Idempotent.
    fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        let timers = {
            let mut inner = self.shared.lock();
            inner.stopped = true;
            inner.window.take_timers()
        };
        for timer in timers {
            timer.cancel();
        }
        let acks = self.acks.take();
        if let Some(handle) = &acks {
            handle.abort();
        }
        acks
    }

    /// Shut down and wait for the ack task to release the socket.
    async fn finish(mut self) {
        if let Some(acks) = self.shutdown() {
            let _ = acks.await;
        }
    }
}

impl Drop for TransferTasks {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Arm the retransmission timer for chunk `index`.
fn arm_timer(shared: &Arc<Shared>, index: u64) -> TimerHandle {
    let owner = Arc::clone(shared);
    TimerHandle::arm(shared.rto, async move { on_timeout(owner, index).await })
}

/// Timer callback.  Re-validates under the lock before acting.
async fn on_timeout(shared: Arc<Shared>, index: u64) {
    let resend = {
        let mut guard = shared.lock();
        let inner = &mut *guard;
        if inner.stopped {
            return;
        }
        match inner.window.on_timeout(index) {
            TimeoutOutcome::Stale => None,
            TimeoutOutcome::Exhausted { index } => {
                let sent = inner.window.entry(index).map_or(0, |e| e.transmissions);
                log::warn!("[arq:timer] chunk {index} unacknowledged after {sent} transmissions; giving up");
                inner.exhausted = Some(index);
                shared.wake.notify_one();
                None
            }
            TimeoutOutcome::Retransmit { seq, payload } => {
                inner.stats.timeouts += 1;
                inner.stats.retransmissions += 1;
                inner.stats.packets_sent += 1;
                let verdict = inner
                    .simulator
                    .apply(packet::encode(PacketType::Data, seq, &payload));
                if let Some(stale) = inner.window.set_timer(index, arm_timer(&shared, index)) {
                    stale.cancel();
                }
                let cc = inner.window.congestion();
                log::warn!(
                    "[arq:timer] timeout idx={index} seq={seq}; retransmitting, cwnd={} ssthresh={}",
                    cc.cwnd(),
                    cc.ssthresh()
                );
                Some((seq, verdict))
            }
        }
    };

    if let Some((seq, verdict)) = resend {
        shared.transmit(seq, verdict).await;
        shared.wake.notify_one();
    }
}

/// Receive and process ACKs until the window drains.  Aborted by
/// [`Connection::transfer`] on every exit path.
async fn ack_loop(shared: Arc<Shared>) {
    loop {
        let (bytes, addr) = match shared.socket.recv_from().await {
            Ok(v) => v,
            Err(e) => {
                // e.g. ICMP port unreachable surfacing as ECONNREFUSED.
                log::debug!("[arq:ack] receive error: {e}");
                continue;
            }
        };
        if addr != shared.peer {
            log::debug!("[arq:ack] ignoring datagram from stranger {addr}");
            continue;
        }
        if shared.handle_datagram(bytes) {
            shared.wake.notify_one();
            return;
        }
    }
}

/// Fill the window, transmit, sleep until woken; repeat until every chunk is
/// acknowledged.
async fn transmit_loop(shared: &Arc<Shared>, chunks: Vec<Vec<u8>>) -> Result<()> {
    let mut chunks = chunks.into_iter();
    loop {
        let batch = {
            let mut guard = shared.lock();
            let inner = &mut *guard;
            if let Some(index) = inner.exhausted {
                return Err(ArqError::RetriesExhausted { seq: index });
            }
            if inner.window.is_complete() {
                return Ok(());
            }

            let mut batch = Vec::new();
            while inner.window.can_send() {
                let Some(payload) = chunks.next() else { break };
                let seq = inner.window.wire_seq(inner.window.next_index());
                let datagram = packet::encode(PacketType::Data, seq, &payload);
                let (index, _) = inner.window.record_sent(payload);
                let verdict = inner.simulator.apply(datagram);
                inner.stats.packets_sent += 1;
                if let Some(stale) = inner.window.set_timer(index, arm_timer(shared, index)) {
                    stale.cancel();
                }
                log::debug!(
                    "[arq:tx] → DATA idx={index} seq={seq} in_flight={} cwnd={:.2}",
                    inner.window.len(),
                    inner.window.congestion().cwnd()
                );
                batch.push((seq, verdict));
            }
            batch
        };

        for (seq, verdict) in batch {
            shared.transmit(seq, verdict).await;
        }
        shared.wake.notified().await;
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One sender-side connection: handshake, windowed transfer, teardown.
///
/// All protocol state is per-connection; nothing outlives the value.
pub struct Connection {
    state: ConnectionState,
    socket: Arc<Socket>,
    peer: SocketAddr,
    config: ArqConfig,
    /// Index the next transfer starts at.
    next_chunk: u64,
}

impl Connection {
    /// Validate `config` and create an idle connection to `peer`.
    pub fn new(socket: Socket, peer: SocketAddr, config: ArqConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: ConnectionState::Idle,
            socket: Arc::new(socket),
            peer,
            config,
            next_chunk: 0,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    /// Run the handshake.  On failure the connection is `Closed` and no data
    /// may be sent.
    pub async fn connect(&mut self) -> Result<()> {
        self.transition(ConnectionState::Idle, ConnectionState::Connecting)?;
        log::info!("[arq] connecting to {}", self.peer);

        match handshake::connect(&self.socket, self.peer, self.config.handshake_timeout).await {
            Ok(()) => {
                self.state = ConnectionState::Transferring;
                log::info!("[arq] connected to {}", self.peer);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                log::warn!("[arq] handshake with {} failed: {e}", self.peer);
                Err(e)
            }
        }
    }

    /// Deliver `chunks` reliably and in order.
    ///
    /// May be called repeatedly; sequence numbers continue across calls.
    ///
    /// Returns once every chunk is acknowledged.  On error the connection is
    /// `Closed` and every armed timer has been cancelled.  The same holds if
    /// the returned future is dropped before it completes.
    pub async fn transfer(&mut self, chunks: Vec<Vec<u8>>) -> Result<TransferReport> {
        self.expect(ConnectionState::Transferring)?;
        let started = Instant::now();
        let total = chunks.len() as u64;
        log::info!("[arq] transferring {total} chunk(s) to {}", self.peer);

        let window = SendWindow::new(total, &self.config).starting_at(self.next_chunk);
        let shared = Arc::new(Shared::new(
            Arc::clone(&self.socket),
            self.peer,
            &self.config,
            window,
        ));

        // Restored below on success only.
        self.state = ConnectionState::Closed;
        let tasks = TransferTasks::spawn(&shared);
        let outcome = transmit_loop(&shared, chunks).await;
        tasks.finish().await;

        let report = shared.report(total, started.elapsed());
        match outcome {
            Ok(()) => {
                self.state = ConnectionState::Transferring;
                self.next_chunk = report.base;
                log::info!(
                    "[arq] transfer complete: {} chunks, {} sent, {} retransmitted, cwnd={:.2}",
                    report.chunks,
                    report.packets_sent,
                    report.retransmissions,
                    report.final_cwnd
                );
                Ok(report)
            }
            Err(e) => {
                log::warn!("[arq] transfer abandoned at base {}: {e}", report.base);
                Err(e)
            }
        }
    }

    /// Send FIN and wait for FIN-ACK.  The connection ends `Closed` either way.
    pub async fn close(&mut self) -> Result<()> {
        self.transition(ConnectionState::Transferring, ConnectionState::Disconnecting)?;
        let result =
            handshake::disconnect(&self.socket, self.peer, self.config.disconnect_timeout).await;
        self.state = ConnectionState::Closed;
        match &result {
            Ok(()) => log::info!("[arq] connection to {} closed", self.peer),
            Err(e) => log::warn!("[arq] teardown with {} failed: {e}", self.peer),
        }
        result
    }

    fn expect(&self, expected: ConnectionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ArqError::BadState {
                expected,
                actual: self.state,
            })
        }
    }

    fn transition(&mut self, from: ConnectionState, to: ConnectionState) -> Result<()> {
        self.expect(from)?;
        debug_assert!(from.can_transition_to(to));
        self.state = to;
        Ok(())
    }
}

/// Connect, transfer `chunks`, and disconnect.
///
/// A failed teardown does not fail the call: the data was already
/// acknowledged.  It is reported through [`TransferReport::closed_cleanly`].
pub async fn send_all(
    socket: Socket,
    peer: SocketAddr,
    chunks: Vec<Vec<u8>>,
    config: ArqConfig,
) -> Result<TransferReport> {
    let mut conn = Connection::new(socket, peer, config)?;
    conn.connect().await?;
    let mut report = conn.transfer(chunks).await?;
    report.closed_cleanly = conn.close().await.is_ok();
    Ok(report)
}

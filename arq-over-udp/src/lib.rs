//! `arq-over-udp`: reliable, ordered chunk delivery over an impaired UDP link.
//!
//! # Architecture
//!
//! ```text
//!  application chunks
//!       │
//!  ┌────▼─────────────┐  DATA   ┌───────────┐        ┌────────────────┐
//!  │  sender::        │────────▶│ simulator │──UDP──▶│  receiver::    │──▶ app
//!  │  Connection      │         │ loss/flip │        │  serve         │
//!  │  (window + AIMD) │◀────────┴───────────┴──UDP───│  (reassembly)  │
//!  └────┬─────────────┘           ACKs               └────────────────┘
//!       │ handshake / teardown
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]       6-byte header wire format with CRC-32
//! - [`simulator`]    seeded loss and corruption on outgoing datagrams
//! - [`congestion`]   AIMD slow start / congestion avoidance
//! - [`window`]       sender sliding window with selective acks
//! - [`timer`]        per-packet retransmission timers
//! - [`handshake`]    SYN / FIN exchanges with bounded waits
//! - [`sender`]       the windowed sender engine and connection lifecycle
//! - [`reassembly`]   receiver reorder buffer and duplicate handling
//! - [`receiver`]     receiver I/O loop
//! - [`state`]        connection state machine
//! - [`config`]       tunables for both ends
//! - [`socket`]       async UDP socket abstraction
//! - [`error`]        error types

pub mod config;
pub mod congestion;
pub mod error;
pub mod handshake;
pub mod packet;
pub mod reassembly;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod window;

pub use config::{ArqConfig, ReceiverConfig};
pub use error::{ArqError, Result};
pub use sender::{send_all, Connection, TransferReport};
pub use socket::Socket;

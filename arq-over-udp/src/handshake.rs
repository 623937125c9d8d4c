//! Connection setup and teardown (client side).
//!
//! ```text
//!  client                     server
//!    │ ── SYN(seq=0) ───────────▶ │
//!    │ ◀────────── SYN-ACK(0) ─── │   (type SYN echoed back)
//!    │ ── ACK(0) ───────────────▶ │
//!    │          ... data ...      │
//!    │ ── FIN(0) ───────────────▶ │
//!    │ ◀────────── FIN-ACK(0) ─── │   (type FIN echoed back)
//! ```
//!
//! Both exchanges use a single attempt with a bounded wait.  Control packets
//! bypass the impairment simulator.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{ArqError, Result};
use crate::packet::{self, Packet, PacketType};
use crate::socket::Socket;

/// Send SYN and wait up to `wait` for the SYN-ACK, then send the final ACK.
///
/// A corrupt reply from the peer fails the handshake immediately with
/// [`ArqError::HandshakeRejected`]; silence fails it with
/// [`ArqError::HandshakeTimeout`].
pub async fn connect(socket: &Socket, peer: SocketAddr, wait: Duration) -> Result<()> {
    socket
        .send_packet(&Packet::control(PacketType::Syn, 0), peer)
        .await?;
    log::debug!("[arq:hs] → SYN to {peer}");

    let deadline = Instant::now() + wait;
    loop {
        let Some(bytes) = recv_from_peer(socket, peer, deadline).await? else {
            log::warn!("[arq:hs] no SYN-ACK from {peer} within {wait:?}");
            return Err(ArqError::HandshakeTimeout);
        };
        match packet::parse(&bytes) {
            Err(e) => {
                log::warn!("[arq:hs] corrupt SYN-ACK: {e}");
                return Err(ArqError::HandshakeRejected);
            }
            Ok(p) if p.kind == PacketType::Syn && p.seq == 0 => {
                socket
                    .send_packet(&Packet::control(PacketType::Ack, 0), peer)
                    .await?;
                log::debug!("[arq:hs] ← SYN-ACK; → ACK");
                return Ok(());
            }
            Ok(p) => log::debug!("[arq:hs] ignoring {} seq={} during handshake", p.kind, p.seq),
        }
    }
}

/// Send FIN and wait up to `wait` for the FIN-ACK.
///
/// Late data ACKs and corrupt datagrams are skipped; only a valid FIN-ACK
/// ends the wait early.
pub async fn disconnect(socket: &Socket, peer: SocketAddr, wait: Duration) -> Result<()> {
    socket
        .send_packet(&Packet::control(PacketType::Fin, 0), peer)
        .await?;
    log::debug!("[arq:hs] → FIN to {peer}");

    let deadline = Instant::now() + wait;
    loop {
        let Some(bytes) = recv_from_peer(socket, peer, deadline).await? else {
            log::warn!("[arq:hs] no FIN-ACK from {peer} within {wait:?}");
            return Err(ArqError::DisconnectTimeout);
        };
        match packet::parse(&bytes) {
            Ok(p) if p.kind == PacketType::Fin && p.seq == 0 => {
                log::debug!("[arq:hs] ← FIN-ACK");
                return Ok(());
            }
            Ok(p) => log::debug!("[arq:hs] skipping {} seq={} during teardown", p.kind, p.seq),
            Err(e) => log::debug!("[arq:hs] skipping corrupt datagram during teardown: {e}"),
        }
    }
}

/// Next datagram from `peer` before `deadline`, or `None` once it passes.
async fn recv_from_peer(
    socket: &Socket,
    peer: SocketAddr,
    deadline: Instant,
) -> Result<Option<Vec<u8>>> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match socket.recv_timeout(remaining).await? {
            None => return Ok(None),
            Some((bytes, addr)) if addr == peer => return Ok(Some(bytes)),
            Some((_, addr)) => log::debug!("[arq:hs] ignoring datagram from stranger {addr}"),
        }
    }
}

//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves raw
//! datagrams.  Decoding and checksum verification are left to the engines so
//! that a corrupt datagram can be counted and discarded instead of surfacing
//! as an I/O error.  All methods take `&self`, so one socket can be shared
//! between the sender's transmit path and its ack loop through an `Arc`.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::packet::Packet;

/// Receive buffer size.  Datagrams larger than this are truncated by the OS
/// and will then fail the checksum.
pub const MAX_DATAGRAM: usize = 65_535;

/// An async, datagram-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send one datagram to `dest`.
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Encode and send a packet unimpaired.
    pub async fn send_packet(&self, packet: &Packet, dest: SocketAddr) -> io::Result<()> {
        self.send_to(&packet.encode(), dest).await
    }

    /// Receive the next datagram.  Returns `(bytes, sender_address)`.
    pub async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    /// Receive with a bounded wait.
    ///
    /// `Ok(None)` means the wait elapsed with nothing to read.
    pub async fn recv_timeout(&self, wait: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        match tokio::time::timeout(wait, self.recv_from()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{self, PacketType};

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn datagram_round_trip() {
        let a = loopback().await;
        let b = loopback().await;

        a.send_packet(&Packet::new(PacketType::Data, 9, b"hi".to_vec()), b.local_addr)
            .await
            .unwrap();
        let (bytes, from) = b.recv_from().await.unwrap();
        assert_eq!(from, a.local_addr);
        let pkt = packet::parse(&bytes).unwrap();
        assert_eq!(pkt.seq, 9);
        assert_eq!(pkt.payload, b"hi");
    }

    #[tokio::test]
    async fn recv_timeout_reports_elapsed_as_none() {
        let a = loopback().await;
        let got = a.recv_timeout(Duration::from_millis(30)).await.unwrap();
        assert!(got.is_none());
    }
}

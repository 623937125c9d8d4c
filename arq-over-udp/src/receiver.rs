//! Receiver I/O loop.
//!
//! A single sequential task: read a datagram, feed it to the
//! [`Reassembler`], hand delivered chunks to the application, send the reply.
//! The loop binds to the source of the first valid packet and ignores
//! everyone else afterwards.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::config::ReceiverConfig;
use crate::error::{ArqError, Result};
use crate::packet::Packet;
use crate::reassembly::Reassembler;
pub use crate::reassembly::ReceiverStats;
use crate::simulator::Simulator;
use crate::socket::Socket;

/// Serve one session on `socket`, sending every delivered chunk into
/// `deliver` in order.
///
/// Returns after the peer's FIN has been answered.  With
/// [`ReceiverConfig::idle_timeout`] set, a silent link ends the session with
/// [`ArqError::IdleTimeout`].
pub async fn serve(
    socket: &Socket,
    config: &ReceiverConfig,
    deliver: mpsc::Sender<Vec<u8>>,
) -> Result<ReceiverStats> {
    config.validate()?;
    let mut engine = Reassembler::new(config.max_sequence_number);
    let mut replies = config.ack_impairment.clone().map(Simulator::new);
    let mut peer: Option<SocketAddr> = None;
    log::info!("[arq:rx] listening on {}", socket.local_addr);

    loop {
        let received = match config.idle_timeout {
            Some(wait) => socket.recv_timeout(wait).await,
            None => socket.recv_from().await.map(Some),
        };
        let (bytes, from) = match received {
            Ok(Some(v)) => v,
            Ok(None) => {
                log::warn!("[arq:rx] idle for {:?}; giving up", config.idle_timeout);
                return Err(ArqError::IdleTimeout);
            }
            Err(e) => {
                log::debug!("[arq:rx] receive error: {e}");
                continue;
            }
        };
        if peer.is_some_and(|p| p != from) {
            log::debug!("[arq:rx] ignoring datagram from stranger {from}");
            continue;
        }

        let step = engine.on_datagram(&bytes);
        if !step.valid {
            continue;
        }
        if peer.is_none() {
            log::info!("[arq:rx] bound to peer {from}");
            peer = Some(from);
        }

        for chunk in step.delivered {
            if deliver.send(chunk).await.is_err() {
                log::debug!("[arq:rx] application stopped listening; chunk dropped");
            }
        }
        if let Some(reply) = step.reply {
            send_reply(socket, replies.as_mut(), &reply, from).await;
        }
        if step.finished {
            let stats = engine.stats();
            log::info!(
                "[arq:rx] session with {from} finished: {} delivered, {} duplicates, {} corrupt",
                stats.delivered,
                stats.duplicates,
                stats.corrupt_discarded
            );
            return Ok(stats);
        }
    }
}

/// Serve one session and collect every delivered chunk.
pub async fn receive_all(
    socket: &Socket,
    config: &ReceiverConfig,
) -> Result<(Vec<Vec<u8>>, ReceiverStats)> {
    let (tx, mut rx) = mpsc::channel(64);
    let collect = async move {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    };
    let (stats, chunks) = tokio::join!(serve(socket, config, tx), collect);
    Ok((chunks, stats?))
}

async fn send_reply(
    socket: &Socket,
    simulator: Option<&mut Simulator>,
    reply: &Packet,
    dest: SocketAddr,
) {
    let bytes = match simulator {
        Some(sim) => match sim.apply(reply.encode()).into_datagram() {
            Some(b) => b,
            None => {
                log::debug!("[arq:sim] {} seq={} lost", reply.kind, reply.seq);
                return;
            }
        },
        None => reply.encode(),
    };
    if let Err(e) = socket.send_to(&bytes, dest).await {
        log::warn!("[arq:rx] failed to send {} seq={}: {e}", reply.kind, reply.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::packet::{self, PacketType};

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn idle_receiver_times_out() {
        let socket = loopback().await;
        let config = ReceiverConfig {
            idle_timeout: Some(Duration::from_millis(50)),
            ..ReceiverConfig::default()
        };
        let result = receive_all(&socket, &config).await;
        assert!(matches!(result, Err(ArqError::IdleTimeout)));
    }

    #[tokio::test]
    async fn reorders_and_answers_fin() {
        let socket = loopback().await;
        let peer = loopback().await;
        let addr = socket.local_addr;
        let config = ReceiverConfig {
            idle_timeout: Some(Duration::from_secs(5)),
            ..ReceiverConfig::default()
        };

        let server = tokio::spawn(async move { receive_all(&socket, &config).await });

        for (seq, body) in [(1u8, "B"), (0, "A"), (2, "C")] {
            peer.send_to(&packet::encode(PacketType::Data, seq, body.as_bytes()), addr)
                .await
                .unwrap();
            let (bytes, _) = peer.recv_from().await.unwrap();
            assert_eq!(packet::parse(&bytes).unwrap(), Packet::control(PacketType::Ack, seq));
        }
        peer.send_packet(&Packet::control(PacketType::Fin, 0), addr)
            .await
            .unwrap();
        let (bytes, _) = peer.recv_from().await.unwrap();
        assert_eq!(packet::parse(&bytes).unwrap().kind, PacketType::Fin);

        let (chunks, stats) = server.await.unwrap().unwrap();
        assert_eq!(chunks, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.buffered, 1);
    }

    #[tokio::test]
    async fn strangers_are_ignored_after_binding() {
        let socket = loopback().await;
        let peer = loopback().await;
        let stranger = loopback().await;
        let addr = socket.local_addr;
        let config = ReceiverConfig {
            idle_timeout: Some(Duration::from_secs(5)),
            ..ReceiverConfig::default()
        };

        let server = tokio::spawn(async move { receive_all(&socket, &config).await });

        peer.send_to(&packet::encode(PacketType::Data, 0, b"mine"), addr)
            .await
            .unwrap();
        peer.recv_from().await.unwrap();

        stranger
            .send_to(&packet::encode(PacketType::Data, 1, b"theirs"), addr)
            .await
            .unwrap();
        stranger
            .send_packet(&Packet::control(PacketType::Fin, 0), addr)
            .await
            .unwrap();
        assert!(stranger
            .recv_timeout(Duration::from_millis(100))
            .await
            .unwrap()
            .is_none());

        peer.send_packet(&Packet::control(PacketType::Fin, 0), addr)
            .await
            .unwrap();
        let (chunks, _) = server.await.unwrap().unwrap();
        assert_eq!(chunks, vec![b"mine".to_vec()]);
    }
}

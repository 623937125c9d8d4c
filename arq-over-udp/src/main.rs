//! Entry point for `arq-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing) and printing results.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use arq_over_udp::simulator::ImpairmentConfig;
use arq_over_udp::{receiver, sender, ArqConfig, ReceiverConfig, Socket};

/// Windowed ARQ with AIMD congestion control over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Connect to a receiver and deliver messages reliably.
    Send {
        /// Receiver address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        to: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Send N generated chunks "Message part 1" .. "Message part N".
        #[arg(short = 'n', long, conflicts_with = "messages")]
        count: Option<u64>,
        #[command(flatten)]
        tunables: Tunables,
        /// Chunks to send, one per argument.
        messages: Vec<String>,
    },
    /// Receive one session and print each chunk as it is delivered.
    Recv {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Give up after this many seconds without traffic.
        #[arg(long)]
        idle_timeout: Option<f64>,
        /// Sequence space size.
        #[arg(long, default_value_t = 256)]
        max_seq: u16,
        /// Probability an outgoing ACK is lost.
        #[arg(long, default_value_t = 0.0)]
        ack_loss: f64,
        /// Probability an outgoing ACK is corrupted.
        #[arg(long, default_value_t = 0.0)]
        ack_corruption: f64,
        /// Seed for the ACK impairment RNG.
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Args)]
struct Tunables {
    #[arg(long, default_value_t = 1.0)]
    initial_cwnd: f64,
    #[arg(long, default_value_t = 16.0)]
    ssthresh: f64,
    /// Retransmission timeout in seconds.
    #[arg(long, default_value_t = 1.0)]
    rto: f64,
    #[arg(long, default_value_t = 0.1)]
    loss: f64,
    #[arg(long, default_value_t = 0.05)]
    corruption: f64,
    #[arg(long, default_value_t = 256)]
    max_seq: u16,
    /// Handshake and teardown wait in seconds.
    #[arg(long, default_value_t = 5.0)]
    control_timeout: f64,
    /// Pass inbound ACKs through the simulator too.
    #[arg(long)]
    impair_acks: bool,
    /// Give up after this many retransmissions of one chunk (0 = never).
    #[arg(long, default_value_t = 50)]
    max_retransmissions: u32,
    /// Seed for the impairment RNG.
    #[arg(long)]
    seed: Option<u64>,
}

impl Tunables {
    fn into_config(self) -> Result<ArqConfig> {
        let control = seconds("control-timeout", self.control_timeout)?;
        Ok(ArqConfig {
            initial_cwnd: self.initial_cwnd,
            slow_start_threshold: self.ssthresh,
            retransmission_timeout: seconds("rto", self.rto)?,
            loss_probability: self.loss,
            corruption_probability: self.corruption,
            max_sequence_number: self.max_seq,
            handshake_timeout: control,
            disconnect_timeout: control,
            impair_acks: self.impair_acks,
            max_retransmissions: (self.max_retransmissions > 0).then_some(self.max_retransmissions),
            seed: self.seed,
        })
    }
}

/// Write each delivered chunk as one line of `out`.
fn spawn_printer<W>(mut out: W) -> (mpsc::Sender<Vec<u8>>, JoinHandle<io::Result<W>>)
where
    W: Write + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    let printer = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            writeln!(out, "{}", String::from_utf8_lossy(&chunk))?;
        }
        out.flush()?;
        Ok::<W, io::Error>(out)
    });
    (tx, printer)
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid --{name} {value}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            to,
            bind,
            count,
            tunables,
            messages,
        } => {
            let chunks: Vec<Vec<u8>> = match count {
                Some(n) => (1..=n)
                    .map(|i| format!("Message part {i}").into_bytes())
                    .collect(),
                None => messages.into_iter().map(String::into_bytes).collect(),
            };
            if chunks.is_empty() {
                bail!("nothing to send: pass messages or --count");
            }
            let config = tunables.into_config()?;
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            log::info!("Sending {} chunk(s) to {to}", chunks.len());

            let report = sender::send_all(socket, to, chunks, config).await?;
            println!(
                "delivered {} chunks in {:.2?}: {} packets sent, {} retransmissions, \
                 {} dropped / {} corrupted in simulator, final cwnd {:.2}, ssthresh {}",
                report.chunks,
                report.elapsed,
                report.packets_sent,
                report.retransmissions,
                report.impairment.dropped,
                report.impairment.corrupted,
                report.final_cwnd,
                report.final_ssthresh
            );
            if !report.closed_cleanly {
                eprintln!("warning: teardown was not acknowledged");
            }
        }
        Mode::Recv {
            bind,
            idle_timeout,
            max_seq,
            ack_loss,
            ack_corruption,
            seed,
        } => {
            let ack_impairment = (ack_loss > 0.0 || ack_corruption > 0.0).then(|| ImpairmentConfig {
                seed,
                ..ImpairmentConfig::new(ack_loss, ack_corruption)
            });
            let config = ReceiverConfig {
                max_sequence_number: max_seq,
                idle_timeout: idle_timeout
                    .map(|s| seconds("idle-timeout", s))
                    .transpose()?,
                ack_impairment,
            };
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;

            let (tx, printer) = spawn_printer(std::io::stdout());
            let stats = receiver::serve(&socket, &config, tx).await?;
            printer.await??;
            eprintln!(
                "session finished: {} delivered, {} buffered out of order, {} duplicates, \
                 {} corrupt discarded",
                stats.delivered, stats.buffered, stats.duplicates, stats.corrupt_discarded
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn printer_writes_one_line_per_chunk() {
        let (tx, printer) = spawn_printer(Vec::new());
        tx.send(b"Message part 1".to_vec()).await.unwrap();
        tx.send(vec![b'o', b'k', 0xFF]).await.unwrap();
        drop(tx);

        let out = printer.await.unwrap().unwrap();
        assert_eq!(out, "Message part 1\nok\u{FFFD}\n".as_bytes());
    }

    #[test]
    fn send_flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "arq-over-udp",
            "send",
            "--to",
            "127.0.0.1:9000",
            "--count",
            "5",
            "--rto",
            "0.25",
            "--loss",
            "0",
            "--max-retransmissions",
            "0",
            "--seed",
            "42",
        ])
        .unwrap();
        let Mode::Send {
            to,
            count,
            tunables,
            messages,
            ..
        } = cli.mode
        else {
            panic!("expected send mode");
        };
        assert_eq!(to, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(count, Some(5));
        assert!(messages.is_empty());

        let config = tunables.into_config().unwrap();
        assert_eq!(config.retransmission_timeout, Duration::from_millis(250));
        assert_eq!(config.loss_probability, 0.0);
        assert_eq!(config.max_retransmissions, None);
        assert_eq!(config.seed, Some(42));
        config.validate().unwrap();
    }

    #[test]
    fn count_conflicts_with_messages() {
        let parsed = Cli::try_parse_from([
            "arq-over-udp",
            "send",
            "--to",
            "127.0.0.1:9000",
            "--count",
            "2",
            "hello",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn negative_timeout_is_rejected() {
        assert!(seconds("rto", -1.0).is_err());
        assert_eq!(seconds("rto", 1.5).unwrap(), Duration::from_millis(1500));
    }
}

//! Entry point for `udp-file-transfer`.
//!
//! Parses CLI arguments and dispatches into **send**, **receive** or
//! **relay** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing, exit codes).

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use udp_file_transfer::config::{
    DEFAULT_LINGER, DEFAULT_MAX_SEGMENT_SIZE, DEFAULT_RETRY_INTERVAL,
};
use udp_file_transfer::error::EXIT_USAGE;
use udp_file_transfer::simulator::{Relay, RelayConfig};
use udp_file_transfer::{receive_file, send_file, TransferConfig};

/// Reliable stop-and-wait file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send one file to a listening receiver.
    Send {
        /// File to send.
        source: PathBuf,
        /// Receiver's UDP port.
        port: u16,
        /// Name the receiver stores the file under.
        name: String,
        /// Receiver host name or address.
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Largest datagram, header included.
        #[arg(long, default_value_t = DEFAULT_MAX_SEGMENT_SIZE)]
        mss: usize,
        /// Retransmission interval in milliseconds.
        #[arg(long, default_value_t = DEFAULT_RETRY_INTERVAL.as_millis() as u64)]
        retry_ms: u64,
    },
    /// Receive one file and store it in the output directory.
    Receive {
        /// UDP port to listen on.
        port: u16,
        /// Directory the received file is written to.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        /// Largest datagram, header included.
        #[arg(long, default_value_t = DEFAULT_MAX_SEGMENT_SIZE)]
        mss: usize,
        /// How long to keep answering a repeated end marker, in milliseconds.
        #[arg(long, default_value_t = DEFAULT_LINGER.as_millis() as u64)]
        linger_ms: u64,
    },
    /// Relay datagrams to a receiver, dropping and corrupting some.
    Relay {
        /// UDP port the sender should target.
        listen_port: u16,
        /// Receiver's UDP port.
        forward_port: u16,
        /// Receiver host name or address.
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Probability of dropping a datagram.
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        /// Probability of flipping one bit in a datagram.
        #[arg(long, default_value_t = 0.0)]
        corrupt: f64,
        /// RNG seed for the fault model.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not usage errors.
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    let code = match cli.mode {
        Mode::Send {
            source,
            port,
            name,
            host,
            mss,
            retry_ms,
        } => {
            let config = TransferConfig::default()
                .with_max_segment_size(mss)
                .with_retry_interval(Duration::from_millis(retry_ms));
            match send_file(&source, &host, port, &name, config).await {
                Ok(_) => 0,
                Err(e) => {
                    log::error!("send failed: {e}");
                    e.exit_code()
                }
            }
        }
        Mode::Receive {
            port,
            output_dir,
            mss,
            linger_ms,
        } => {
            let config = TransferConfig::default()
                .with_max_segment_size(mss)
                .with_linger(Duration::from_millis(linger_ms));
            match receive_file(port, &output_dir, config).await {
                Ok(report) => {
                    log::info!(
                        "received {:?} ({} bytes) from {}",
                        report.file_name,
                        report.bytes_written,
                        report.peer
                    );
                    0
                }
                Err(e) => {
                    log::error!("receive failed: {e}");
                    e.exit_code()
                }
            }
        }
        Mode::Relay {
            listen_port,
            forward_port,
            host,
            loss,
            corrupt,
            seed,
        } => {
            let config = RelayConfig::transparent()
                .with_loss(loss)
                .with_corruption(corrupt)
                .with_seed(seed);
            match run_relay(listen_port, &host, forward_port, config).await {
                Ok(()) => 0,
                Err(e) => {
                    log::error!("relay failed: {e:#}");
                    1
                }
            }
        }
    };
    process::exit(code);
}

async fn run_relay(
    listen_port: u16,
    host: &str,
    forward_port: u16,
    config: RelayConfig,
) -> anyhow::Result<()> {
    let target = tokio::net::lookup_host((host, forward_port))
        .await
        .with_context(|| format!("resolving {host}"))?
        .find(SocketAddr::is_ipv4)
        .with_context(|| format!("no IPv4 address for {host}"))?;
    let relay = Relay::bind((Ipv4Addr::UNSPECIFIED, listen_port).into(), target, config)
        .await
        .with_context(|| format!("binding relay on port {listen_port}"))?;
    log::info!("[relay] {} → {target}", relay.local_addr()?);

    tokio::select! {
        res = relay.run() => res.context("relaying datagrams"),
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for interrupt")?;
            log::info!("[relay] interrupted");
            Ok(())
        }
    }
}

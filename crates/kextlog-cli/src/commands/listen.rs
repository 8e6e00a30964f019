//! Listen command implementation.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use kextlog_core::StreamDecoder;
use tokio::net::UnixDatagram;
use tracing::{debug, info};

use super::output::{OutputFormat, Printer};
use super::DEFAULT_BUFFER_SIZE;

/// Arguments for the listen command.
#[derive(Args)]
pub struct ListenArgs {
    /// Path to bind the datagram socket at
    pub socket: PathBuf,

    /// Receive buffer size; longer datagrams are cut short
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Remove a stale socket file before binding
    #[arg(long)]
    pub force: bool,
}

/// Execute the listen command.
pub async fn execute(args: ListenArgs) -> Result<()> {
    if args.buffer_size == 0 {
        anyhow::bail!("Buffer size must be positive");
    }
    if args.force && args.socket.exists() {
        std::fs::remove_file(&args.socket)
            .with_context(|| format!("Failed to remove {}", args.socket.display()))?;
    }

    let socket = UnixDatagram::bind(&args.socket)
        .with_context(|| format!("Failed to bind {}", args.socket.display()))?;
    info!(socket = %args.socket.display(), "Listening for records");

    let mut buf = vec![0u8; args.buffer_size];
    let mut decoder = StreamDecoder::new();
    let mut printer = Printer::new(io::stdout(), args.format);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            received = socket.recv(&mut buf) => {
                let n = match received.context("Failed to receive datagram") {
                    Ok(n) => n,
                    Err(e) => break Err(e),
                };
                debug!(bytes = n, "Datagram received");
                // each datagram carries whole records
                if let Err(e) = printer.print(decoder.push_batch(&buf[..n])) {
                    break Err(e);
                }
            }
            _ = &mut shutdown => break Ok(()),
        }
    };

    drop(socket);
    if let Err(e) = std::fs::remove_file(&args.socket) {
        debug!(error = %e, "Socket file already gone");
    }

    let stats = decoder.stats();
    info!(
        records = stats.records,
        gaps = stats.gaps,
        corrupt_batches = stats.corrupt_batches,
        "Stopped listening"
    );
    result
}

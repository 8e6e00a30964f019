//! Read command implementation.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use kextlog_core::{DecoderStats, StreamDecoder};
use tracing::{info, warn};

use super::output::{OutputFormat, Printer};
use super::DEFAULT_BUFFER_SIZE;

/// Arguments for the read command.
#[derive(Args)]
pub struct ReadArgs {
    /// Captured record stream; stdin when omitted
    pub file: Option<PathBuf>,

    /// Bytes requested per read
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Runs the read command.
pub fn run(args: &ReadArgs) -> Result<()> {
    let input: Box<dyn Read> = match &args.file {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };

    let stats = decode(input, io::stdout().lock(), args.buffer_size, args.format)?;
    info!(
        records = stats.records,
        gaps = stats.gaps,
        corrupt_batches = stats.corrupt_batches,
        discarded_bytes = stats.discarded_bytes,
        "Stream decoded"
    );
    Ok(())
}

/// Decodes `input` in `buffer_size` chunks and prints every record to `out`.
///
/// Records split across chunks are reassembled. A partial record left at
/// end of input is discarded with a warning.
///
/// # Errors
///
/// Returns an error if `buffer_size` is zero or on I/O failure.
pub fn decode<R: Read, W: Write>(
    mut input: R,
    out: W,
    buffer_size: usize,
    format: OutputFormat,
) -> Result<DecoderStats> {
    if buffer_size == 0 {
        anyhow::bail!("Buffer size must be positive");
    }

    let mut buf = vec![0u8; buffer_size];
    let mut decoder = StreamDecoder::new();
    let mut printer = Printer::new(out, format);

    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read record stream"),
        };
        printer.print(decoder.push(&buf[..n]))?;
    }

    let leftover = decoder.finish();
    if leftover > 0 {
        warn!(bytes = leftover, "Stream ended inside a record");
    }
    Ok(decoder.stats())
}

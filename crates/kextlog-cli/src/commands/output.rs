//! Record printing.

use std::borrow::Cow;
use std::io::Write;

use anyhow::Result;
use kextlog_core::{DecodeEvent, Level, Record};
use serde::Serialize;
use tracing::warn;

/// Output format for decoded records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// `[pid:tid] ts LEVEL flags  message`
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// JSON shape of one record.
#[derive(Debug, Serialize)]
pub struct RecordView<'a> {
    pub pid: i32,
    pub tid: u64,
    pub timestamp: u64,
    pub level: Level,
    pub dropped: bool,
    pub truncated: bool,
    pub message: Cow<'a, str>,
}

impl<'a> From<&'a Record> for RecordView<'a> {
    fn from(record: &'a Record) -> Self {
        Self {
            pid: record.header.pid,
            tid: record.header.tid,
            timestamp: record.header.timestamp,
            level: record.header.level,
            dropped: record.is_dropped_predecessor(),
            truncated: record.is_truncated(),
            message: record.message(),
        }
    }
}

/// Two-character flag column: `D` for dropped predecessor, `T` for truncated.
fn flags_column(record: &Record) -> &'static str {
    match (record.is_dropped_predecessor(), record.is_truncated()) {
        (false, false) => "--",
        (true, false) => "D-",
        (false, true) => "-T",
        (true, true) => "DT",
    }
}

/// Renders one record as a single output line, without the newline.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render(record: &Record, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => {
            let header = &record.header;
            Ok(format!(
                "[{}:{:#x}] {:#x} {:<5} {}  {}",
                header.pid,
                header.tid,
                header.timestamp,
                header.level.as_str(),
                flags_column(record),
                record.message()
            ))
        }
        OutputFormat::Json => Ok(serde_json::to_string(&RecordView::from(record))?),
    }
}

/// Writes decoded records to `out`, reporting corruption through `tracing`.
pub struct Printer<W: Write> {
    out: W,
    format: OutputFormat,
}

impl<W: Write> Printer<W> {
    /// Creates a printer.
    pub const fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    /// Prints every record in `events` and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn print(&mut self, events: Vec<DecodeEvent>) -> Result<()> {
        for event in events {
            match event {
                DecodeEvent::Record(record) => {
                    if record.is_dropped_predecessor() {
                        warn!(pid = record.header.pid, "Records were lost before this one");
                    }
                    writeln!(self.out, "{}", render(&record, self.format)?)?;
                }
                DecodeEvent::Corrupt {
                    offset,
                    discarded,
                    error,
                } => {
                    warn!(offset, discarded, error = %error, "Discarded corrupt batch");
                }
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

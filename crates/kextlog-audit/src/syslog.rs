//! Last-resort synchronous system log.
//!
//! When a record cannot reach the control channel its text is written here
//! instead, so nothing disappears without at least a local trace.

use std::fmt::{self, Debug, Write};
use std::sync::Arc;

use kextlog_core::Level;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

/// Host sink for messages that could not be streamed.
pub trait SystemLog: Send + Sync + Debug {
    /// Writes one message. Must not block for long.
    fn write(&self, level: Level, message: &str);
}

/// [`SystemLog`] that forwards to `tracing` under target `kextlog::syslog`.
#[derive(Debug, Default)]
pub struct TracingSystemLog;

impl TracingSystemLog {
    /// Creates a new tracing system log.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SystemLog for TracingSystemLog {
    fn write(&self, level: Level, message: &str) {
        match level {
            Level::Trace => trace!(target: "kextlog::syslog", "{message}"),
            Level::Debug => debug!(target: "kextlog::syslog", "{message}"),
            Level::Info => info!(target: "kextlog::syslog", "{message}"),
            Level::Warning => warn!(target: "kextlog::syslog", "{message}"),
            Level::Error => error!(target: "kextlog::syslog", "{message}"),
        }
    }
}

/// In-memory [`SystemLog`] for testing.
#[derive(Debug, Default)]
pub struct MemorySystemLog {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemorySystemLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every message written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().clone()
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl SystemLog for MemorySystemLog {
    fn write(&self, level: Level, message: &str) {
        self.lines.lock().push((level, message.to_string()));
    }
}

/// Serializes fallback writes through one bounded buffer.
///
/// The buffer has its own lock, independent of the control channel's.
#[derive(Debug)]
pub struct FallbackSink {
    sink: Arc<dyn SystemLog>,
    buffer: Mutex<String>,
    capacity: usize,
}

impl FallbackSink {
    /// Creates a sink whose messages are cut to `capacity - 1` bytes.
    #[must_use]
    pub fn new(sink: Arc<dyn SystemLog>, capacity: usize) -> Self {
        Self {
            sink,
            buffer: Mutex::new(String::with_capacity(capacity)),
            capacity,
        }
    }

    /// Renders `args` and writes the result to the system log.
    pub fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        let mut buffer = self.buffer.lock();
        buffer.clear();
        let mut writer = TruncatingWriter {
            out: &mut buffer,
            limit: self.capacity.saturating_sub(1),
        };
        let _ = writer.write_fmt(args);
        self.sink.write(level, &buffer);
    }
}

struct TruncatingWriter<'a> {
    out: &'a mut String,
    limit: usize,
}

impl Write for TruncatingWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.limit.saturating_sub(self.out.len());
        if s.len() <= room {
            self.out.push_str(s);
        } else {
            let mut end = room;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            self.out.push_str(&s[..end]);
        }
        Ok(())
    }
}

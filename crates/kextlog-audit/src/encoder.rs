//! Record encoder.
//!
//! [`Logger::log`] renders formatted text into a wire record and hands it to
//! the control channel. Short text is rendered straight into an inline buffer
//! of [`FAST_PATH_CAPACITY`] bytes. Longer text is measured by that first
//! render, then rendered again into one allocation of exactly the right size.
//! When the channel cannot take the record the text goes to the system log.

use std::fmt::{self, Write};
use std::sync::Arc;

use kextlog_core::{Level, RecordFlags, RecordHeader, HEADER_LEN};
use tracing::{error, warn};

use crate::buffer::{BufferAllocator, SystemAllocator};
use crate::channel::ControlChannel;
use crate::config::KextlogConfig;
use crate::host::HostRuntime;
use crate::stats::Statistics;
use crate::syslog::{FallbackSink, SystemLog};

/// Capacity of the inline payload buffer, trailing NUL included.
pub const FAST_PATH_CAPACITY: usize = 128;

const INLINE_LEN: usize = HEADER_LEN + FAST_PATH_CAPACITY;

/// Buffer a delivered record was built in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The inline buffer; no allocation happened.
    Inline,
    /// A buffer allocated for this record.
    Heap,
}

/// Why a record went to the system log instead of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// No consumer was attached.
    NotConnected,
    /// The channel refused the record.
    EnqueueFailed,
}

/// Outcome of [`Logger::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The record was handed to the consumer.
    Enqueued {
        /// Buffer the record was built in.
        route: Route,
        /// Whether the payload was cut short.
        truncated: bool,
    },
    /// The text was written to the system log.
    Fallback {
        /// Why the channel was bypassed.
        reason: FallbackReason,
    },
}

impl Delivery {
    /// Returns true if the record reached the channel.
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }
}

/// Renders log calls into records and delivers them.
#[derive(Debug)]
pub struct Logger {
    channel: Arc<ControlChannel>,
    runtime: Arc<dyn HostRuntime>,
    allocator: Arc<dyn BufferAllocator>,
    fallback: FallbackSink,
    stats: Arc<Statistics>,
    max_payload_len: usize,
}

impl Logger {
    /// Creates a logger with the system allocator and fresh statistics.
    #[must_use]
    pub fn new(
        channel: Arc<ControlChannel>,
        runtime: Arc<dyn HostRuntime>,
        syslog: Arc<dyn SystemLog>,
        config: &KextlogConfig,
    ) -> Self {
        Self {
            channel,
            runtime,
            allocator: Arc::new(SystemAllocator::new()),
            fallback: FallbackSink::new(syslog, config.syslog_buffer_size),
            stats: Arc::new(Statistics::new()),
            max_payload_len: config.max_payload_len,
        }
    }

    /// Replaces the allocator used for long records.
    #[must_use]
    pub fn with_allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Shares `stats` instead of the logger's own counters.
    #[must_use]
    pub fn with_statistics(mut self, stats: Arc<Statistics>) -> Self {
        self.stats = stats;
        self
    }

    /// Routing counters.
    #[must_use]
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.stats
    }

    /// The channel records are delivered to.
    #[must_use]
    pub fn channel(&self) -> &Arc<ControlChannel> {
        &self.channel
    }

    /// Emits one record.
    ///
    /// `args` may be rendered more than once and should produce the same text
    /// each time; if it grows between renders the record is cut short and
    /// flagged truncated.
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) -> Delivery {
        if !self.channel.is_connected() {
            self.channel.mark_dropped();
            return self.fall_back(level, args, FallbackReason::NotConnected);
        }

        let mut inline = [0u8; INLINE_LEN];
        let measured = render(&mut inline[HEADER_LEN..INLINE_LEN - 1], args);

        if measured < FAST_PATH_CAPACITY {
            self.stats.record_stackmsg();
            let record = self.seal(&mut inline, level, RecordFlags::EMPTY, measured);
            return self.deliver(record, level, args, Route::Inline, false);
        }

        match self.render_heap(level, args, measured) {
            Some(mut heap) => {
                self.stats.record_heapmsg();
                let flags = if heap.truncated {
                    RecordFlags::TRUNCATED
                } else {
                    RecordFlags::EMPTY
                };
                let record = self.seal(&mut heap.buf, level, flags, heap.len);
                self.deliver(record, level, args, Route::Heap, heap.truncated)
            }
            None => {
                let record = self.seal(
                    &mut inline,
                    level,
                    RecordFlags::TRUNCATED,
                    FAST_PATH_CAPACITY - 1,
                );
                self.deliver(record, level, args, Route::Inline, true)
            }
        }
    }

    fn render_heap(&self, level: Level, args: fmt::Arguments<'_>, measured: usize) -> Option<HeapRecord> {
        let mut want = measured;
        let mut retried = false;
        loop {
            let Some(total) = self.record_len(want) else {
                error!(%level, len = want, "Record size overflow, truncating");
                return None;
            };
            let Some(mut buf) = self.allocator.allocate(total) else {
                self.stats.record_oom();
                warn!(%level, len = total, "Record allocation failed, truncating");
                return None;
            };

            let rendered = render(&mut buf[HEADER_LEN..total - 1], args);
            if rendered <= want {
                buf.truncate(HEADER_LEN + rendered + 1);
                return Some(HeapRecord {
                    buf,
                    len: rendered,
                    truncated: false,
                });
            }

            self.stats.record_toctou();
            warn!(measured = want, rendered, "Record text grew between renders");
            if retried {
                return Some(HeapRecord {
                    buf,
                    len: want,
                    truncated: true,
                });
            }
            retried = true;
            want = rendered;
        }
    }

    fn record_len(&self, payload_len: usize) -> Option<usize> {
        if payload_len > self.max_payload_len {
            return None;
        }
        let size = payload_len.checked_add(1)?;
        u32::try_from(size).ok()?;
        HEADER_LEN.checked_add(size)
    }

    fn seal<'a>(&self, buf: &'a mut [u8], level: Level, flags: RecordFlags, len: usize) -> &'a mut [u8] {
        let header = RecordHeader {
            pid: self.runtime.current_pid(),
            tid: self.runtime.current_tid(),
            timestamp: self.runtime.absolute_time(),
            level,
            flags,
            size: u32::try_from(len + 1).unwrap_or(u32::MAX),
        };
        buf[..HEADER_LEN].copy_from_slice(&header.to_bytes());
        let end = HEADER_LEN + len;
        buf[end] = 0;
        &mut buf[..=end]
    }

    fn deliver(
        &self,
        record: &mut [u8],
        level: Level,
        args: fmt::Arguments<'_>,
        route: Route,
        truncated: bool,
    ) -> Delivery {
        match self.channel.enqueue(record) {
            Ok(()) => Delivery::Enqueued { route, truncated },
            Err(_) => {
                self.stats.record_enqueue_failure();
                self.fall_back(level, args, FallbackReason::EnqueueFailed)
            }
        }
    }

    fn fall_back(&self, level: Level, args: fmt::Arguments<'_>, reason: FallbackReason) -> Delivery {
        self.stats.record_syslog();
        self.fallback.emit(level, args);
        Delivery::Fallback { reason }
    }
}

struct HeapRecord {
    buf: Vec<u8>,
    len: usize,
    truncated: bool,
}

/// Renders `args` into `buf`, stopping silently when it is full.
///
/// Returns the length the text would have had without the bound.
fn render(buf: &mut [u8], args: fmt::Arguments<'_>) -> usize {
    let mut writer = BoundedWriter {
        buf,
        written: 0,
        total: 0,
    };
    let _ = writer.write_fmt(args);
    writer.total
}

struct BoundedWriter<'a> {
    buf: &'a mut [u8],
    written: usize,
    total: usize,
}

impl Write for BoundedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let n = bytes.len().min(self.buf.len() - self.written);
        self.buf[self.written..self.written + n].copy_from_slice(&bytes[..n]);
        self.written += n;
        self.total = self.total.saturating_add(bytes.len());
        Ok(())
    }
}

//! Diagnostic counters for the encoding pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counters describing how records were routed.
///
/// Purely diagnostic; nothing in the pipeline reads them back.
#[derive(Debug, Default)]
pub struct Statistics {
    stackmsg: AtomicU64,
    heapmsg: AtomicU64,
    oom: AtomicU64,
    toctou: AtomicU64,
    enqueue_failure: AtomicU64,
    syslog: AtomicU64,
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Records built in the inline buffer.
    pub stackmsg: u64,
    /// Records built in a dynamically allocated buffer.
    pub heapmsg: u64,
    /// Allocation failures that forced truncation.
    pub oom: u64,
    /// Renders that came out longer the second time.
    pub toctou: u64,
    /// Records the control channel refused.
    pub enqueue_failure: u64,
    /// Messages written to the fallback system log.
    pub syslog: u64,
}

macro_rules! counter {
    ($name:ident, $field:ident) => {
        pub(crate) fn $name(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl Statistics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_stackmsg, stackmsg);
    counter!(record_heapmsg, heapmsg);
    counter!(record_oom, oom);
    counter!(record_toctou, toctou);
    counter!(record_enqueue_failure, enqueue_failure);
    counter!(record_syslog, syslog);

    /// Copies the current values.
    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            stackmsg: self.stackmsg.load(Ordering::Relaxed),
            heapmsg: self.heapmsg.load(Ordering::Relaxed),
            oom: self.oom.load(Ordering::Relaxed),
            toctou: self.toctou.load(Ordering::Relaxed),
            enqueue_failure: self.enqueue_failure.load(Ordering::Relaxed),
            syslog: self.syslog.load(Ordering::Relaxed),
        }
    }
}

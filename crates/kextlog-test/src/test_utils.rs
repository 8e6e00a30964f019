//! Test bench wiring an observer to the mock host.
//!
//! # Examples
//!
//! ```rust
//! use kextlog_audit::Scope;
//! use kextlog_test::{MockVnode, TestBench};
//!
//! let bench = TestBench::new();
//! let _registration = bench.start().unwrap();
//! bench.connect(1);
//!
//! bench.host.authorize(
//!     Scope::Vnode,
//!     &bench.request(1 << 1).arg(1, MockVnode::file("/etc/hosts").arg()),
//! );
//!
//! let messages = bench.messages();
//! assert!(messages[0].contains("READ_DATA"));
//! ```

use std::sync::Arc;

use kextlog_audit::{
    BufferAllocator, Credential, Delivery, FallbackReason, HostRuntime, Kextlog, KextlogConfig,
    MemorySocket, MemorySystemLog, Registration, Result, ScopeRegistry, ScopeRequest,
};
use kextlog_core::{DecodeEvent, Record, StreamDecoder};

use crate::mock_host::MockHost;

/// Uid used by [`TestBench::request`].
pub const TEST_UID: u32 = 501;

/// An observer wired to a [`MockHost`], an in-memory socket and an
/// in-memory system log.
#[derive(Debug)]
pub struct TestBench {
    /// Host runtime and scope registry.
    pub host: Arc<MockHost>,
    /// Consumer side of the control channel.
    pub socket: Arc<MemorySocket>,
    /// Last-resort log.
    pub syslog: Arc<MemorySystemLog>,
    /// The observer.
    pub kextlog: Arc<Kextlog>,
}

impl Default for TestBench {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBench {
    /// Creates a bench with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a bench builder.
    #[must_use]
    pub fn builder() -> TestBenchBuilder {
        TestBenchBuilder::default()
    }

    /// Attaches the observer's listeners to the mock host.
    ///
    /// # Errors
    ///
    /// Returns the registration error if the host refuses a listener.
    pub fn start(&self) -> Result<Registration> {
        self.kextlog
            .start(Arc::clone(&self.host) as Arc<dyn ScopeRegistry>)
    }

    /// Attaches consumer `unit`.
    ///
    /// # Panics
    ///
    /// Panics if another consumer is attached.
    pub fn connect(&self, unit: u32) {
        self.kextlog
            .connect(unit)
            .unwrap_or_else(|e| panic!("connect({unit}) failed: {e}"));
    }

    /// A request from uid [`TEST_UID`] with no arguments.
    #[must_use]
    pub fn request(&self, action: u32) -> ScopeRequest {
        request(action)
    }

    /// Drains the socket and decodes every record in it.
    ///
    /// # Panics
    ///
    /// Panics if the stream is corrupt.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        decode_stream(&self.socket.take_stream())
    }

    /// Drains the socket and returns the record texts.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|record| record.message().into_owned())
            .collect()
    }

    /// Texts written to the system log so far.
    #[must_use]
    pub fn syslog_messages(&self) -> Vec<String> {
        self.syslog.lines().into_iter().map(|(_, text)| text).collect()
    }

    /// The `uid: .. pid: .. name` suffix every scope message ends with.
    #[must_use]
    pub fn actor_suffix(&self) -> String {
        let pid = self.host.current_pid();
        let name = self.host.proc_name(pid).unwrap_or_default();
        format!("uid: {TEST_UID} pid: {pid} {name}")
    }
}

/// Builder for [`TestBench`].
#[derive(Debug, Default)]
pub struct TestBenchBuilder {
    host: Option<MockHost>,
    config: Option<KextlogConfig>,
    socket_capacity: Option<usize>,
    allocator: Option<Arc<dyn BufferAllocator>>,
}

impl TestBenchBuilder {
    /// Uses `host` instead of a default [`MockHost`].
    #[must_use]
    pub fn host(mut self, host: MockHost) -> Self {
        self.host = Some(host);
        self
    }

    /// Uses `config` for the observer.
    #[must_use]
    pub fn config(mut self, config: KextlogConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Bounds the socket's receive buffer.
    #[must_use]
    pub fn socket_capacity(mut self, capacity: usize) -> Self {
        self.socket_capacity = Some(capacity);
        self
    }

    /// Uses `allocator` for record and path buffers.
    #[must_use]
    pub fn allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Builds the bench.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    #[must_use]
    pub fn build(self) -> TestBench {
        let host = Arc::new(self.host.unwrap_or_default());
        let socket = Arc::new(
            self.socket_capacity
                .map_or_else(MemorySocket::new, MemorySocket::with_capacity),
        );
        let syslog = Arc::new(MemorySystemLog::new());

        let mut builder = Kextlog::builder()
            .config(self.config.unwrap_or_default())
            .runtime(host.clone())
            .socket(socket.clone())
            .syslog(syslog.clone());
        if let Some(allocator) = self.allocator {
            builder = builder.allocator(allocator);
        }
        let kextlog = builder
            .build()
            .unwrap_or_else(|e| panic!("invalid test bench: {e}"));

        TestBench {
            host,
            socket,
            syslog,
            kextlog: Arc::new(kextlog),
        }
    }
}

/// A request from uid [`TEST_UID`] with no arguments.
#[must_use]
pub fn request(action: u32) -> ScopeRequest {
    ScopeRequest::new(Credential::new(TEST_UID, 20), action)
}

/// Decodes a complete captured stream.
///
/// # Panics
///
/// Panics if the stream contains a corrupt batch or ends mid-record.
#[must_use]
pub fn decode_stream(bytes: &[u8]) -> Vec<Record> {
    let mut decoder = StreamDecoder::new();
    let records = decoder
        .push(bytes)
        .into_iter()
        .map(|event| match event {
            DecodeEvent::Record(record) => record,
            DecodeEvent::Corrupt { offset, error, .. } => {
                panic!("corrupt stream at byte {offset}: {error}")
            }
        })
        .collect();
    assert_eq!(decoder.finish(), 0, "stream ends mid-record");
    records
}

/// Asserts that a record reached the channel.
///
/// # Panics
///
/// Panics if the record fell back to the system log.
#[track_caller]
pub fn assert_enqueued(delivery: Delivery) {
    assert!(
        delivery.is_enqueued(),
        "Expected the record to be enqueued, got {delivery:?}"
    );
}

/// Asserts that a record fell back to the system log for `reason`.
///
/// # Panics
///
/// Panics on any other outcome.
#[track_caller]
pub fn assert_fallback(delivery: Delivery, reason: FallbackReason) {
    assert_eq!(
        delivery,
        Delivery::Fallback { reason },
        "Expected a fallback to the system log"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use kextlog_core::Level;

    #[test]
    fn test_bench_round_trip() {
        let bench = TestBench::new();
        bench.connect(3);
        assert_enqueued(bench.kextlog.log(Level::Info, format_args!("ping")));
        assert_eq!(bench.messages(), ["ping"]);
        assert!(bench.messages().is_empty());
    }

    #[test]
    fn test_bench_without_consumer() {
        let bench = TestBench::new();
        assert_fallback(
            bench.kextlog.log(Level::Warning, format_args!("nobody")),
            FallbackReason::NotConnected,
        );
        assert_eq!(bench.syslog_messages(), ["nobody"]);
    }

    #[test]
    fn test_request_defaults() {
        let request = request(4);
        assert_eq!(request.credential.uid, TEST_UID);
        assert_eq!(request.action, 4);
        assert!(request
            .args
            .iter()
            .all(|arg| matches!(arg, kextlog_audit::ScopeArg::Absent)));
    }

    #[test]
    #[should_panic(expected = "stream ends mid-record")]
    fn test_decode_stream_rejects_partial_record() {
        let _ = decode_stream(&[0u8; 12]);
    }
}

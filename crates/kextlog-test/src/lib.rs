//! # kextlog Test
//!
//! Test harness for the kextlog observer.
//!
//! This crate provides:
//!
//! - A simulated host that answers runtime queries and fires scope requests
//! - Mock filesystem objects and processes to pass as scope arguments
//! - Allocators that count or refuse buffer requests
//! - A bench wiring it all together, plus assertion helpers
//!
//! ## Example
//!
//! ```rust
//! use kextlog_audit::Scope;
//! use kextlog_test::{MockProcess, MockHost, TestBench};
//!
//! let bench = TestBench::builder()
//!     .host(MockHost::new().with_process(MockProcess::new(42, "Safari")))
//!     .build();
//! let registration = bench.start().unwrap();
//! bench.connect(1);
//!
//! let request = bench
//!     .request(1)
//!     .arg(0, MockProcess::new(42, "Safari").arg())
//!     .arg(1, kextlog_audit::ScopeArg::Int(9));
//! bench.host.authorize(Scope::Process, &request);
//!
//! assert!(bench.messages()[0].ends_with("dst: 42 Safari sig: 9"));
//! registration.deregister();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocators;
pub mod mock_host;
pub mod mock_vnode;
pub mod test_utils;

pub use allocators::{CountingAllocator, FailingAllocator};
pub use kextlog_audit::MemorySystemLog as RecordingSyslog;
pub use mock_host::{HoldHandle, MockHost, DEFAULT_PID, DEFAULT_PROC_NAME};
pub use mock_vnode::{MockProcess, MockVnode};
pub use test_utils::{
    assert_enqueued, assert_fallback, decode_stream, request, TestBench, TestBenchBuilder,
    TEST_UID,
};

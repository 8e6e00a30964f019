//! # kextlog Audit
//!
//! Producer side of kextlog: an authorization-scope observer that renders
//! every intercepted decision into a record and streams it to one consumer.
//!
//! ## Pipeline
//!
//! - [`Dispatcher`] - four interception callbacks (generic, process, vnode,
//!   fileop) that decode raw scope arguments and always defer
//! - [`QuiescenceGate`] - lets callbacks run concurrently while teardown
//!   waits for the ones in flight
//! - [`Logger`] - renders text into a wire record, inline when it is short and
//!   in one exact allocation otherwise, and falls back to the system log
//! - [`ControlChannel`] - single-consumer channel with drop accounting
//!
//! The host is reached only through traits ([`HostRuntime`], [`Vnode`],
//! [`ControlSocket`], [`SystemLog`], [`BufferAllocator`], [`ScopeRegistry`]).
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kextlog_audit::{Kextlog, MemorySocket};
//! use kextlog_core::{Level, StreamDecoder};
//!
//! let socket = Arc::new(MemorySocket::new());
//! let kextlog = Kextlog::builder().socket(socket.clone()).build().unwrap();
//!
//! kextlog.connect(1).unwrap();
//! kextlog.log(Level::Info, format_args!("hello {}", "world"));
//!
//! let events = StreamDecoder::new().push_batch(&socket.take_stream());
//! assert_eq!(events.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Checks a programming invariant.
///
/// A violation is logged under target `kextlog::bug` and is fatal in debug
/// builds. Release builds carry on; the macro evaluates to whether the
/// condition held so the caller can bail out.
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {{
        let ok: bool = $cond;
        if !ok {
            tracing::error!(target: "kextlog::bug", $($arg)+);
            if cfg!(debug_assertions) {
                panic!($($arg)+);
            }
        }
        ok
    }};
}

pub(crate) use invariant;

pub mod buffer;
pub mod channel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod gate;
pub mod host;
pub mod path;
pub mod registry;
pub mod scope;
pub mod socket;
pub mod stats;
pub mod syslog;


pub use buffer::{BufferAllocator, SystemAllocator};
pub use channel::{ChannelError, ControlChannel, EnqueueError};
pub use config::{KextlogConfig, KextlogConfigBuilder};
pub use context::{Kextlog, KextlogBuilder};
pub use dispatch::{Dispatcher, ScopeRequest, Verdict};
pub use encoder::{Delivery, FallbackReason, Logger, Route, FAST_PATH_CAPACITY};
pub use error::{Error, Result};
pub use gate::{GateGuard, QuiescenceGate, INVALIDATED};
pub use host::{Credential, HostRuntime, ProcessRef, SystemRuntime};
pub use path::{resolve, resolve_in, PathError, Vnode, VnodePath, VnodeType};
pub use registry::{ListenError, ListenerId, Registration, ScopeCallback, ScopeRegistry};
pub use scope::{
    ArgError, FileOp, GenericAction, ProcessAction, Scope, ScopeArg, ScopeArgs, VnodeAction,
    VnodeRequest,
};
#[cfg(unix)]
pub use socket::UnixDatagramSocket;
pub use socket::{ControlSocket, MemorySocket, SocketError};
pub use stats::{Statistics, StatisticsSnapshot};
pub use syslog::{FallbackSink, MemorySystemLog, SystemLog, TracingSystemLog};

//! Host side of the control channel: where record bytes actually go.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::io;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

/// Default receive buffer of a control socket in bytes.
pub const DEFAULT_RECV_SPACE: usize = 8 * 1024;

/// Transmission failure reported by a [`ControlSocket`].
#[derive(Error, Debug)]
pub enum SocketError {
    /// The consumer's receive buffer has no room for the record.
    #[error("no room for {needed} bytes ({available} available)")]
    Full {
        /// Bytes the record needs.
        needed: usize,
        /// Bytes free in the receive buffer.
        available: usize,
    },

    /// The consumer end is gone.
    #[error("consumer endpoint closed")]
    Closed,

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Delivers whole records to the attached consumer unit.
///
/// Implementations must never block: a record that cannot be delivered right
/// now is an error.
pub trait ControlSocket: Send + Sync + Debug {
    /// Enqueues one complete record for `unit`.
    ///
    /// # Errors
    ///
    /// Returns a [`SocketError`] if the record was not delivered.
    fn enqueue(&self, unit: u32, record: &[u8]) -> Result<(), SocketError>;
}

/// In-memory [`ControlSocket`] with a bounded receive buffer.
///
/// Useful for tests and for embedding the observer in-process.
#[derive(Debug)]
pub struct MemorySocket {
    inner: Mutex<MemorySocketState>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct MemorySocketState {
    records: VecDeque<(u32, Vec<u8>)>,
    used: usize,
    fail_next: usize,
    closed: bool,
}

impl Default for MemorySocket {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySocket {
    /// Creates a socket with the default receive buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECV_SPACE)
    }

    /// Creates a socket holding at most `capacity` unread bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemorySocketState::default()),
            capacity,
        }
    }

    /// Makes the next `count` enqueues fail as if the consumer were gone.
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().fail_next = count;
    }

    /// Marks the consumer end closed or open.
    pub fn set_closed(&self, closed: bool) {
        self.inner.lock().closed = closed;
    }

    /// Removes and returns every buffered record in delivery order.
    #[must_use]
    pub fn take_records(&self) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.used = 0;
        inner.records.drain(..).map(|(_, bytes)| bytes).collect()
    }

    /// Removes every buffered record and returns them as one byte stream.
    #[must_use]
    pub fn take_stream(&self) -> Vec<u8> {
        self.take_records().concat()
    }

    /// Units that records were delivered to, in order.
    #[must_use]
    pub fn units(&self) -> Vec<u32> {
        self.inner.lock().records.iter().map(|(unit, _)| *unit).collect()
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn used(&self) -> usize {
        self.inner.lock().used
    }
}

impl ControlSocket for MemorySocket {
    fn enqueue(&self, unit: u32, record: &[u8]) -> Result<(), SocketError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SocketError::Closed);
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(SocketError::Closed);
        }
        let available = self.capacity.saturating_sub(inner.used);
        if record.len() > available {
            return Err(SocketError::Full {
                needed: record.len(),
                available,
            });
        }
        inner.used += record.len();
        inner.records.push_back((unit, record.to_vec()));
        Ok(())
    }
}

/// [`ControlSocket`] that sends each record as one datagram to a Unix socket.
#[cfg(unix)]
#[derive(Debug)]
pub struct UnixDatagramSocket {
    socket: std::os::unix::net::UnixDatagram,
    target: PathBuf,
}

#[cfg(unix)]
impl UnixDatagramSocket {
    /// Creates a non-blocking sender for the consumer bound at `target`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sending socket cannot be created.
    pub fn new(target: impl AsRef<Path>) -> io::Result<Self> {
        let socket = std::os::unix::net::UnixDatagram::unbound()?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            target: target.as_ref().to_path_buf(),
        })
    }

    /// Path of the consumer socket.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }
}

#[cfg(unix)]
impl ControlSocket for UnixDatagramSocket {
    fn enqueue(&self, _unit: u32, record: &[u8]) -> Result<(), SocketError> {
        match self.socket.send_to(record, &self.target) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(SocketError::Full {
                needed: record.len(),
                available: 0,
            }),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                Err(SocketError::Closed)
            }
            Err(e) => Err(SocketError::Io(e)),
        }
    }
}

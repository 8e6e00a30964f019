//! Single-consumer control channel.
//!
//! At most one consumer unit is attached at a time. Enqueues are serialized by
//! one short critical section which also owns the sticky "a record was lost"
//! bit: the next record that does get through carries
//! [`RecordFlags::DROPPED`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use kextlog_core::{or_flags_in_place, RecordFlags};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::socket::{ControlSocket, SocketError};

/// Reasons a consumer cannot attach.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Another consumer is already attached.
    #[error("control channel already connected to unit {current}")]
    AlreadyConnected {
        /// Unit currently attached.
        current: u32,
    },

    /// Unit 0 means "unconnected" and cannot be attached.
    #[error("unit 0 is reserved")]
    InvalidUnit,
}

/// Reasons a record was not enqueued.
#[derive(Error, Debug)]
pub enum EnqueueError {
    /// No consumer is attached.
    #[error("control channel not connected")]
    NotConnected,

    /// The socket refused the record.
    #[error("enqueue to unit {unit} failed: {source}")]
    Transmit {
        /// Unit the record was meant for.
        unit: u32,
        /// Socket failure.
        #[source]
        source: SocketError,
    },
}

/// The control channel between the observer and its one consumer.
#[derive(Debug)]
pub struct ControlChannel {
    unit: AtomicU32,
    socket: Arc<dyn ControlSocket>,
    last_dropped: Mutex<bool>,
}

impl ControlChannel {
    /// Creates an unconnected channel delivering through `socket`.
    #[must_use]
    pub fn new(socket: Arc<dyn ControlSocket>) -> Self {
        Self {
            unit: AtomicU32::new(0),
            socket,
            last_dropped: Mutex::new(false),
        }
    }

    /// Attaches consumer `unit`. Only one attach can win while unconnected.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidUnit`] for unit 0 and
    /// [`ChannelError::AlreadyConnected`] if a consumer is attached.
    pub fn connect(&self, unit: u32) -> Result<(), ChannelError> {
        if unit == 0 {
            return Err(ChannelError::InvalidUnit);
        }
        match self
            .unit
            .compare_exchange(0, unit, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                debug!(unit, "Control channel connected");
                Ok(())
            }
            Err(current) => {
                warn!(unit, current, "Control channel already connected, refusing");
                Err(ChannelError::AlreadyConnected { current })
            }
        }
    }

    /// Detaches consumer `unit`.
    ///
    /// Returns false, leaving the channel as it was, if `unit` is not the
    /// attached consumer (for example a consumer whose connect was refused).
    pub fn disconnect(&self, unit: u32) -> bool {
        if unit == 0 {
            return false;
        }
        let detached = self
            .unit
            .compare_exchange(unit, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if detached {
            debug!(unit, "Control channel disconnected");
        }
        detached
    }

    /// Currently attached unit, if any.
    #[must_use]
    pub fn connected_unit(&self) -> Option<u32> {
        match self.unit.load(Ordering::Acquire) {
            0 => None,
            unit => Some(unit),
        }
    }

    /// Returns true if a consumer is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected_unit().is_some()
    }

    /// Notes that a record was lost without going through [`enqueue`](Self::enqueue).
    pub fn mark_dropped(&self) {
        *self.last_dropped.lock() = true;
    }

    /// Returns true if the next delivered record will carry the dropped flag.
    #[must_use]
    pub fn has_pending_drop(&self) -> bool {
        *self.last_dropped.lock()
    }

    /// Delivers one serialized record to the attached consumer.
    ///
    /// Never blocks on the consumer and never retries. If an earlier record
    /// was lost, [`RecordFlags::DROPPED`] is ORed into this record's header
    /// before it is sent.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::NotConnected`] without a consumer and
    /// [`EnqueueError::Transmit`] if the socket refuses the record.
    pub fn enqueue(&self, record: &mut [u8]) -> Result<(), EnqueueError> {
        let result = {
            let mut last_dropped = self.last_dropped.lock();
            let unit = self.unit.load(Ordering::Acquire);
            let result = if unit == 0 {
                Err(EnqueueError::NotConnected)
            } else {
                if *last_dropped {
                    or_flags_in_place(record, RecordFlags::DROPPED);
                }
                self.socket
                    .enqueue(unit, record)
                    .map_err(|source| EnqueueError::Transmit { unit, source })
            };
            *last_dropped = result.is_err();
            result
        };

        if let Err(e) = &result {
            error!(len = record.len(), error = %e, "Control channel enqueue failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::MemorySocket;
    use kextlog_core::{flags_of, Level, Record};
    use std::sync::Barrier;
    use std::thread;

    fn record(text: &str) -> Vec<u8> {
        Record::from_text(1, 1, 0, Level::Info, RecordFlags::EMPTY, text)
            .unwrap()
            .to_bytes()
    }

    fn channel() -> (Arc<MemorySocket>, ControlChannel) {
        let socket = Arc::new(MemorySocket::new());
        let channel = ControlChannel::new(socket.clone());
        (socket, channel)
    }

    #[test]
    fn test_racing_connects_one_wins() {
        let (_, channel) = channel();
        let barrier = Barrier::new(2);

        let results = thread::scope(|s| {
            let a = s.spawn(|| {
                barrier.wait();
                channel.connect(5)
            });
            let b = s.spawn(|| {
                barrier.wait();
                channel.connect(7)
            });
            [a.join().unwrap(), b.join().unwrap()]
        });

        let winners: Vec<_> = [5, 7]
            .into_iter()
            .zip(results)
            .filter_map(|(unit, r)| r.is_ok().then_some(unit))
            .collect();
        assert_eq!(winners.len(), 1);
        let winner = winners[0];
        let loser = if winner == 5 { 7 } else { 5 };

        assert_eq!(channel.connected_unit(), Some(winner));
        assert!(!channel.disconnect(loser));
        assert_eq!(channel.connected_unit(), Some(winner));
        assert!(channel.disconnect(winner));
        assert_eq!(channel.connected_unit(), None);
    }

    #[test]
    fn test_connect_rejects_unit_zero_and_second_consumer() {
        let (_, channel) = channel();
        assert_eq!(channel.connect(0), Err(ChannelError::InvalidUnit));
        channel.connect(3).unwrap();
        assert_eq!(
            channel.connect(4),
            Err(ChannelError::AlreadyConnected { current: 3 })
        );
    }

    #[test]
    fn test_disconnect_when_unconnected_is_noop() {
        let (_, channel) = channel();
        assert!(!channel.disconnect(9));
        assert!(!channel.disconnect(0));
        assert!(!channel.is_connected());
    }

    #[test]
    fn test_enqueue_without_consumer_marks_drop() {
        let (socket, channel) = channel();
        let mut first = record("lost");
        assert!(matches!(
            channel.enqueue(&mut first),
            Err(EnqueueError::NotConnected)
        ));
        assert!(channel.has_pending_drop());

        channel.connect(2).unwrap();
        let mut second = record("kept");
        channel.enqueue(&mut second).unwrap();
        assert!(!channel.has_pending_drop());

        let delivered = socket.take_records();
        assert_eq!(delivered.len(), 1);
        assert!(flags_of(&delivered[0]).unwrap().contains(RecordFlags::DROPPED));
    }

    #[test]
    fn test_drop_flag_is_sticky_until_a_success() {
        let (socket, channel) = channel();
        channel.connect(1).unwrap();

        socket.fail_next(2);
        assert!(channel.enqueue(&mut record("a")).is_err());
        assert!(channel.enqueue(&mut record("b")).is_err());

        channel.enqueue(&mut record("c")).unwrap();
        channel.enqueue(&mut record("d")).unwrap();

        let delivered = socket.take_records();
        assert_eq!(delivered.len(), 2);
        assert!(flags_of(&delivered[0]).unwrap().contains(RecordFlags::DROPPED));
        assert!(flags_of(&delivered[1]).unwrap().is_empty());
    }

    #[test]
    fn test_full_socket_is_a_transmit_error() {
        let socket = Arc::new(MemorySocket::with_capacity(10));
        let channel = ControlChannel::new(socket);
        channel.connect(1).unwrap();

        let err = channel.enqueue(&mut record("does not fit")).unwrap_err();
        assert!(matches!(
            err,
            EnqueueError::Transmit {
                unit: 1,
                source: SocketError::Full { .. }
            }
        ));
    }

    #[test]
    fn test_mark_dropped_flags_next_record() {
        let (socket, channel) = channel();
        channel.connect(1).unwrap();
        channel.mark_dropped();
        channel.enqueue(&mut record("after")).unwrap();
        let delivered = socket.take_records();
        assert!(flags_of(&delivered[0]).unwrap().contains(RecordFlags::DROPPED));
    }
}

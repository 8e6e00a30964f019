//! Quiescence gate for interception callbacks.
//!
//! Every callback enters the gate before touching shared state and leaves it
//! on return. Teardown calls [`QuiescenceGate::invalidate`], which closes the
//! gate to new entries and sleeps until the callbacks already inside have
//! left. After that the gate reads as [`INVALIDATED`] forever.
//!
//! The whole state lives in one atomic cell: the count of callbacks inside,
//! a draining bit set while `invalidate` waits, and `-1` once invalidated.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Value reported by [`QuiescenceGate::read`] once the gate is invalidated.
pub const INVALIDATED: i64 = -1;

const DRAINING: i64 = 1 << 62;

/// Tri-state counter guarding callback entry and teardown.
#[derive(Debug)]
pub struct QuiescenceGate {
    state: AtomicI64,
    lock: Mutex<()>,
    drained: Condvar,
    poll_interval: Duration,
}

impl Default for QuiescenceGate {
    fn default() -> Self {
        Self::new()
    }
}

impl QuiescenceGate {
    /// Creates an open gate with nobody inside.
    #[must_use]
    pub fn new() -> Self {
        Self::with_poll_interval(Duration::from_millis(1))
    }

    /// Creates an open gate whose teardown sleeps at most `poll_interval` at a
    /// time between checks.
    #[must_use]
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            state: AtomicI64::new(0),
            lock: Mutex::new(()),
            drained: Condvar::new(),
            poll_interval,
        }
    }

    /// Enters the gate.
    ///
    /// Returns `None` once teardown has begun; the caller must then skip its
    /// work silently. The returned guard leaves the gate when dropped.
    #[must_use]
    pub fn enter(&self) -> Option<GateGuard<'_>> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current < 0 || current & DRAINING != 0 {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(GateGuard { gate: self }),
                Err(actual) => current = actual,
            }
        }
    }

    fn exit(&self) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let inside = if current < 0 { 0 } else { current & !DRAINING };
            if !crate::invariant!(
                inside > 0,
                "quiescence gate exit without a matching enter (state: {current:#x})"
            ) {
                return;
            }
            match self.state.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if inside == 1 && current & DRAINING != 0 {
                        let _lock = self.lock.lock();
                        self.drained.notify_all();
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns a snapshot: the number of callbacks inside, or [`INVALIDATED`].
    #[must_use]
    pub fn read(&self) -> i64 {
        let current = self.state.load(Ordering::Acquire);
        if current < 0 {
            INVALIDATED
        } else {
            current & !DRAINING
        }
    }

    /// Returns true once [`invalidate`](Self::invalidate) has completed.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.state.load(Ordering::Acquire) < 0
    }

    /// Closes the gate and blocks until every callback inside has left.
    ///
    /// Call once, after the registration points that trigger callbacks were
    /// removed and before the state they use is released. Calling it twice is
    /// a logic error.
    pub fn invalidate(&self) {
        let previous = self.state.fetch_or(DRAINING, Ordering::AcqRel);
        if !crate::invariant!(
            previous >= 0 && previous & DRAINING == 0,
            "quiescence gate invalidated more than once (state: {previous:#x})"
        ) {
            return;
        }

        debug!(inside = previous, "Draining interception callbacks");

        let mut lock = self.lock.lock();
        while self.state.load(Ordering::Acquire) != DRAINING {
            let _ = self.drained.wait_for(&mut lock, self.poll_interval);
        }
        drop(lock);

        let swapped = self
            .state
            .compare_exchange(DRAINING, INVALIDATED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        crate::invariant!(swapped, "quiescence gate changed while draining");
    }
}

/// Proof of a successful [`QuiescenceGate::enter`]; leaves the gate on drop.
#[must_use = "dropping the guard leaves the gate immediately"]
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a QuiescenceGate,
}

impl GateGuard<'_> {
    /// Leaves the gate now.
    pub fn exit(self) {
        drop(self);
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{mpsc, Barrier};
    use std::thread;

    #[test]
    fn test_enter_exit_counts() {
        let gate = QuiescenceGate::new();
        assert_eq!(gate.read(), 0);

        let a = gate.enter().unwrap();
        let b = gate.enter().unwrap();
        assert_eq!(gate.read(), 2);

        a.exit();
        assert_eq!(gate.read(), 1);
        drop(b);
        assert_eq!(gate.read(), 0);
    }

    #[test]
    fn test_invalidate_idle_gate() {
        let gate = QuiescenceGate::new();
        gate.invalidate();
        assert_eq!(gate.read(), INVALIDATED);
        assert!(gate.is_invalidated());
        assert!(gate.enter().is_none());
        assert_eq!(gate.read(), INVALIDATED);
    }

    #[test]
    fn test_invalidate_waits_for_three_in_flight_callbacks() {
        let gate = QuiescenceGate::new();
        let entered = Barrier::new(4);
        let invalidated = AtomicBool::new(false);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    let guard = gate.enter().unwrap();
                    entered.wait();
                    release_rx.lock().recv().unwrap();
                    assert!(!invalidated.load(Ordering::SeqCst));
                    drop(guard);
                });
            }

            entered.wait();
            assert_eq!(gate.read(), 3);

            let teardown = s.spawn(|| {
                gate.invalidate();
                invalidated.store(true, Ordering::SeqCst);
            });

            // new callbacks are turned away as soon as teardown starts
            while gate.enter().is_some_and(|g| {
                drop(g);
                true
            }) {
                thread::yield_now();
            }
            thread::sleep(Duration::from_millis(20));
            assert!(!invalidated.load(Ordering::SeqCst));
            assert_eq!(gate.read(), 3);

            for _ in 0..3 {
                release_tx.send(()).unwrap();
            }
            teardown.join().unwrap();
        });

        assert!(invalidated.load(Ordering::SeqCst));
        assert_eq!(gate.read(), INVALIDATED);
        assert!(gate.enter().is_none());
    }

    #[test]
    fn test_concurrent_enter_exit_then_invalidate() {
        let gate = QuiescenceGate::new();
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        if let Some(guard) = gate.enter() {
                            assert!(gate.read() >= 1);
                            drop(guard);
                        }
                    }
                });
            }
        });
        assert_eq!(gate.read(), 0);
        gate.invalidate();
        assert_eq!(gate.read(), INVALIDATED);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "exit without a matching enter")]
    fn test_unpaired_exit_is_fatal_in_debug() {
        QuiescenceGate::new().exit();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalidated more than once")]
    fn test_double_invalidate_is_fatal_in_debug() {
        let gate = QuiescenceGate::new();
        gate.invalidate();
        gate.invalidate();
    }
}

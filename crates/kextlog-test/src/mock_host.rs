//! In-memory host: runtime facts plus a scope listener registry.
//!
//! [`MockHost`] stands in for the kernel. It answers [`HostRuntime`] queries
//! from a fixed process table and a ticking clock, and it implements
//! [`ScopeRegistry`] so tests can fire authorization requests at whatever
//! listeners the observer attached.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use kextlog_audit::{Credential, Scope, ScopeRequest};
//! use kextlog_test::{MockHost, MockProcess};
//!
//! let host = Arc::new(
//!     MockHost::new()
//!         .with_pid(321)
//!         .with_proc_name("launchd")
//!         .with_process(MockProcess::new(88, "Finder")),
//! );
//!
//! // Nothing attached yet, so nobody answers.
//! let verdicts = host.authorize(Scope::Generic, &ScopeRequest::new(Credential::root(), 1));
//! assert!(verdicts.is_empty());
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use kextlog_audit::{
    HostRuntime, ListenError, ListenerId, Scope, ScopeCallback, ScopeRegistry, ScopeRequest,
    Verdict,
};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::mock_vnode::MockProcess;

/// Default pid of the acting process.
pub const DEFAULT_PID: i32 = 100;

/// Default name of the acting process.
pub const DEFAULT_PROC_NAME: &str = "mockd";

/// Simulated kernel host.
#[derive(Debug)]
pub struct MockHost {
    pid: i32,
    proc_name: String,
    processes: HashMap<i32, String>,
    refused: HashSet<Scope>,
    clock: AtomicU64,
    threads: Mutex<HashMap<ThreadId, u64>>,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_listener: AtomicU64,
    hold: Mutex<Option<Arc<Hold>>>,
}

struct Listener {
    scope: Scope,
    callback: ScopeCallback,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    /// Creates a host whose actor is [`DEFAULT_PID`] named
    /// [`DEFAULT_PROC_NAME`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            pid: DEFAULT_PID,
            proc_name: DEFAULT_PROC_NAME.to_string(),
            processes: HashMap::new(),
            refused: HashSet::new(),
            clock: AtomicU64::new(1_000),
            threads: Mutex::new(HashMap::new()),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener: AtomicU64::new(1),
            hold: Mutex::new(None),
        }
    }

    /// Sets the pid of the acting process.
    #[must_use]
    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }

    /// Sets the name of the acting process.
    #[must_use]
    pub fn with_proc_name(mut self, name: impl Into<String>) -> Self {
        self.proc_name = name.into();
        self
    }

    /// Adds a process to the process table.
    #[must_use]
    pub fn with_process(mut self, process: MockProcess) -> Self {
        self.processes.insert(process.pid(), process.name().to_string());
        self
    }

    /// Makes [`listen`](ScopeRegistry::listen) fail for `scope`.
    #[must_use]
    pub fn refusing(mut self, scope: Scope) -> Self {
        self.refused.insert(scope);
        self
    }

    /// Number of listeners attached to `scope`.
    #[must_use]
    pub fn listener_count(&self, scope: Scope) -> usize {
        self.listeners
            .lock()
            .values()
            .filter(|l| l.scope == scope)
            .count()
    }

    /// Total number of attached listeners.
    #[must_use]
    pub fn total_listeners(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Calls every listener attached to `scope`, in attach order, and
    /// collects their verdicts.
    pub fn authorize(&self, scope: Scope, request: &ScopeRequest) -> Vec<Verdict> {
        let callbacks: Vec<ScopeCallback> = self
            .listeners
            .lock()
            .values()
            .filter(|l| l.scope == scope)
            .map(|l| Arc::clone(&l.callback))
            .collect();
        callbacks.iter().map(|callback| callback(request)).collect()
    }

    /// Makes every caller asking for the current process name park until
    /// the returned handle is released or dropped.
    ///
    /// Callbacks ask for the name right after entering the quiescence gate,
    /// so this pins them inside it.
    pub fn hold_callbacks(&self) -> HoldHandle {
        let hold = Arc::new(Hold::default());
        *self.hold.lock() = Some(Arc::clone(&hold));
        HoldHandle { hold }
    }
}

impl HostRuntime for MockHost {
    fn current_pid(&self) -> i32 {
        self.pid
    }

    fn current_tid(&self) -> u64 {
        let mut threads = self.threads.lock();
        let next = 0x1000 + threads.len() as u64;
        *threads.entry(std::thread::current().id()).or_insert(next)
    }

    fn current_proc_name(&self) -> String {
        let hold = self.hold.lock().clone();
        if let Some(hold) = hold {
            hold.park();
        }
        self.proc_name.clone()
    }

    fn proc_name(&self, pid: i32) -> Option<String> {
        if pid == self.pid {
            return Some(self.proc_name.clone());
        }
        self.processes.get(&pid).cloned()
    }

    fn absolute_time(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

impl ScopeRegistry for MockHost {
    fn listen(&self, scope: Scope, callback: ScopeCallback) -> Result<ListenerId, ListenError> {
        if self.refused.contains(&scope) {
            return Err(ListenError::new("listener table full"));
        }
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, Listener { scope, callback });
        debug!(%scope, id, "Mock listener attached");
        Ok(ListenerId(id))
    }

    fn unlisten(&self, id: ListenerId) {
        if let Some(listener) = self.listeners.lock().remove(&id.0) {
            debug!(scope = %listener.scope, id = id.0, "Mock listener detached");
        }
    }
}

#[derive(Debug, Default)]
struct Hold {
    state: Mutex<HoldState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct HoldState {
    parked: usize,
    released: bool,
}

impl Hold {
    fn park(&self) {
        let mut state = self.state.lock();
        state.parked += 1;
        self.changed.notify_all();
        while !state.released {
            self.changed.wait(&mut state);
        }
    }

    fn release(&self) {
        self.state.lock().released = true;
        self.changed.notify_all();
    }
}

/// Keeps callbacks parked; see [`MockHost::hold_callbacks`].
#[derive(Debug)]
#[must_use = "dropping the handle releases the callbacks"]
pub struct HoldHandle {
    hold: Arc<Hold>,
}

impl HoldHandle {
    /// Blocks until at least `count` callers are parked.
    pub fn wait_for_parked(&self, count: usize) {
        let mut state = self.hold.state.lock();
        while state.parked < count {
            self.hold.changed.wait(&mut state);
        }
    }

    /// Number of callers that have parked so far.
    #[must_use]
    pub fn parked(&self) -> usize {
        self.hold.state.lock().parked
    }

    /// Lets every parked caller continue.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for HoldHandle {
    fn drop(&mut self) {
        self.hold.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kextlog_audit::{Credential, ProcessRef};
    use std::thread;

    #[test]
    fn test_runtime_answers() {
        let host = MockHost::new()
            .with_pid(7)
            .with_proc_name("kernel_task")
            .with_process(MockProcess::new(42, "Safari"));

        assert_eq!(host.current_pid(), 7);
        assert_eq!(host.current_proc_name(), "kernel_task");
        assert_eq!(host.proc_name(42).as_deref(), Some("Safari"));
        assert_eq!(host.proc_name(7).as_deref(), Some("kernel_task"));
        assert_eq!(host.proc_name(43), None);
        let t0 = host.absolute_time();
        assert!(host.absolute_time() > t0);
    }

    #[test]
    fn test_thread_ids_are_stable_per_thread() {
        let host = Arc::new(MockHost::new());
        let here = host.current_tid();
        assert_eq!(host.current_tid(), here);
        let other = {
            let host = Arc::clone(&host);
            thread::spawn(move || host.current_tid()).join().unwrap()
        };
        assert_ne!(here, other);
    }

    #[test]
    fn test_listen_and_authorize() {
        let host = MockHost::new();
        let callback: ScopeCallback = Arc::new(|_request: &ScopeRequest| Verdict::Defer);
        let id = host.listen(Scope::Process, callback).unwrap();
        assert_eq!(host.listener_count(Scope::Process), 1);

        let request = ScopeRequest::new(Credential::root(), 1)
            .arg(0, kextlog_audit::ScopeArg::Process(ProcessRef::new(1)));
        assert_eq!(host.authorize(Scope::Process, &request), [Verdict::Defer]);
        assert!(host.authorize(Scope::Vnode, &request).is_empty());

        host.unlisten(id);
        assert_eq!(host.total_listeners(), 0);
    }

    #[test]
    fn test_refusing_scope() {
        let host = MockHost::new().refusing(Scope::FileOp);
        let callback: ScopeCallback = Arc::new(|_request: &ScopeRequest| Verdict::Defer);
        let err = host.listen(Scope::FileOp, callback).unwrap_err();
        assert_eq!(err.reason, "listener table full");
    }

    #[test]
    fn test_hold_parks_until_released() {
        let host = Arc::new(MockHost::new());
        let handle = host.hold_callbacks();

        let worker = {
            let host = Arc::clone(&host);
            thread::spawn(move || host.current_proc_name())
        };
        handle.wait_for_parked(1);
        assert_eq!(handle.parked(), 1);
        assert!(!worker.is_finished());

        handle.release();
        assert_eq!(worker.join().unwrap(), DEFAULT_PROC_NAME);
    }
}

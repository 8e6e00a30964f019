//! Host runtime seam: who is running, on which thread, and when.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Credential of the actor asking for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
}

impl Credential {
    /// Creates a credential.
    #[must_use]
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// The superuser credential.
    #[must_use]
    pub const fn root() -> Self {
        Self::new(0, 0)
    }
}

/// Reference to a process passed as a scope argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessRef {
    /// Process id.
    pub pid: i32,
}

impl ProcessRef {
    /// Creates a process reference.
    #[must_use]
    pub const fn new(pid: i32) -> Self {
        Self { pid }
    }
}

/// Facts about the current execution context supplied by the host.
///
/// Every call may happen on any thread, concurrently with any other.
pub trait HostRuntime: Send + Sync + Debug {
    /// Process id of the current actor.
    fn current_pid(&self) -> i32;

    /// Identity of the current thread.
    fn current_tid(&self) -> u64;

    /// Short name of the current process.
    fn current_proc_name(&self) -> String;

    /// Short name of process `pid`, if it still exists.
    fn proc_name(&self, pid: i32) -> Option<String>;

    /// Monotonic, non-decreasing host time.
    fn absolute_time(&self) -> u64;
}

/// [`HostRuntime`] backed by the standard library and `/proc` where present.
#[derive(Debug)]
pub struct SystemRuntime {
    epoch: Instant,
}

impl Default for SystemRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRuntime {
    /// Creates a runtime whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TID: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
}

fn read_comm(pid: &str) -> Option<String> {
    let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    Some(comm.trim_end().to_string())
}

impl HostRuntime for SystemRuntime {
    fn current_pid(&self) -> i32 {
        i32::try_from(std::process::id()).unwrap_or(i32::MAX)
    }

    fn current_tid(&self) -> u64 {
        TID.with(|tid| *tid)
    }

    fn current_proc_name(&self) -> String {
        read_comm("self")
            .or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            })
            .unwrap_or_else(|| "?".to_string())
    }

    fn proc_name(&self, pid: i32) -> Option<String> {
        if pid == self.current_pid() {
            return Some(self.current_proc_name());
        }
        read_comm(&pid.to_string())
    }

    fn absolute_time(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

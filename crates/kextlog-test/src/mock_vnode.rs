//! Mock filesystem objects and processes for scope arguments.
//!
//! # Examples
//!
//! ```rust
//! use kextlog_audit::{Vnode, VnodeType};
//! use kextlog_test::MockVnode;
//!
//! let dir = MockVnode::dir("/Users/me").build();
//! assert!(dir.is_dir());
//!
//! let gone = MockVnode::file("/tmp/x").unresolvable().build();
//! assert_eq!(gone.vtype(), VnodeType::Reg);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kextlog_audit::{PathError, ProcessRef, ScopeArg, Vnode, VnodeType};

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(0xffff_ff80_0010_0000);

/// Builder and implementation of a mock [`Vnode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockVnode {
    vtype: VnodeType,
    vid: u32,
    identity: u64,
    path: Option<String>,
}

impl MockVnode {
    /// Creates an object of `vtype` with no path.
    #[must_use]
    pub fn new(vtype: VnodeType) -> Self {
        Self {
            vtype,
            vid: 1,
            identity: NEXT_IDENTITY.fetch_add(0x100, Ordering::Relaxed),
            path: None,
        }
    }

    /// Creates a regular file at `path`.
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(VnodeType::Reg).with_path(path)
    }

    /// Creates a directory at `path`.
    #[must_use]
    pub fn dir(path: impl Into<String>) -> Self {
        Self::new(VnodeType::Dir).with_path(path)
    }

    /// Sets the path the host reports.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the generation number.
    #[must_use]
    pub const fn with_vid(mut self, vid: u32) -> Self {
        self.vid = vid;
        self
    }

    /// Sets the opaque identity.
    #[must_use]
    pub const fn with_identity(mut self, identity: u64) -> Self {
        self.identity = identity;
        self
    }

    /// Makes path lookups fail.
    #[must_use]
    pub fn unresolvable(mut self) -> Self {
        self.path = None;
        self
    }

    /// Finishes the object.
    #[must_use]
    pub fn build(self) -> Arc<dyn Vnode> {
        Arc::new(self)
    }

    /// Finishes the object as a scope argument.
    #[must_use]
    pub fn arg(self) -> ScopeArg {
        ScopeArg::Vnode(self.build())
    }
}

impl Vnode for MockVnode {
    fn vtype(&self) -> VnodeType {
        self.vtype
    }

    fn vid(&self) -> u32 {
        self.vid
    }

    fn identity(&self) -> u64 {
        self.identity
    }

    fn fill_path(&self, buf: &mut [u8]) -> Result<usize, PathError> {
        let path = self.path.as_deref().ok_or_else(|| PathError::Unresolvable {
            reason: "object has no name".to_string(),
        })?;
        let len = path.len() + 1;
        if len > buf.len() {
            return Err(PathError::Unresolvable {
                reason: format!("name needs {len} bytes, buffer holds {}", buf.len()),
            });
        }
        buf[..path.len()].copy_from_slice(path.as_bytes());
        buf[path.len()] = 0;
        Ok(len)
    }
}

/// A process in the mock process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockProcess {
    pid: i32,
    name: String,
}

impl MockProcess {
    /// Creates a process.
    #[must_use]
    pub fn new(pid: i32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }

    /// Process id.
    #[must_use]
    pub const fn pid(&self) -> i32 {
        self.pid
    }

    /// Process name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference to this process as a scope argument.
    #[must_use]
    pub const fn arg(&self) -> ScopeArg {
        ScopeArg::Process(ProcessRef::new(self.pid))
    }
}

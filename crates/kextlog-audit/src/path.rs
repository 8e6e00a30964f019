//! Filesystem object path resolution.

use std::borrow::Cow;
use std::fmt::{self, Debug};

use thiserror::Error;

use crate::buffer::{BufferAllocator, SystemAllocator};

/// Kind of a filesystem object, numbered as the host numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum VnodeType {
    /// No type.
    Non = 0,
    /// Regular file.
    Reg = 1,
    /// Directory.
    Dir = 2,
    /// Block device.
    Blk = 3,
    /// Character device.
    Chr = 4,
    /// Symbolic link.
    Lnk = 5,
    /// Socket.
    Sock = 6,
    /// Named pipe.
    Fifo = 7,
    /// Dead object.
    Bad = 8,
    /// Stream.
    Str = 9,
    /// Complex object.
    Cplx = 10,
}

impl VnodeType {
    /// Host numbering of the type.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Host name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Non => "VNON",
            Self::Reg => "VREG",
            Self::Dir => "VDIR",
            Self::Blk => "VBLK",
            Self::Chr => "VCHR",
            Self::Lnk => "VLNK",
            Self::Sock => "VSOCK",
            Self::Fifo => "VFIFO",
            Self::Bad => "VBAD",
            Self::Str => "VSTR",
            Self::Cplx => "VCPLX",
        }
    }
}

impl fmt::Display for VnodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to produce a path for a filesystem object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path buffer could not be allocated.
    #[error("cannot allocate {len} byte path buffer")]
    NoMemory {
        /// Requested buffer size.
        len: usize,
    },

    /// The host could not name the object.
    #[error("path lookup failed: {reason}")]
    Unresolvable {
        /// Reason reported by the host.
        reason: String,
    },
}

/// A filesystem object as seen by the host.
pub trait Vnode: Send + Sync + Debug {
    /// Kind of object.
    fn vtype(&self) -> VnodeType;

    /// Generation number of the object.
    fn vid(&self) -> u32;

    /// Opaque identity, stable for the object's lifetime.
    fn identity(&self) -> u64;

    /// Writes one NUL-terminated path of the object into `buf`.
    ///
    /// Returns the number of bytes written, NUL included.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::Unresolvable`] if the object cannot be named.
    fn fill_path(&self, buf: &mut [u8]) -> Result<usize, PathError>;

    /// Returns true for directories.
    fn is_dir(&self) -> bool {
        self.vtype() == VnodeType::Dir
    }
}

/// An owned, resolved path. The buffer is released when this is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnodePath {
    buf: Vec<u8>,
    len: usize,
}

impl VnodePath {
    /// Path length in bytes, NUL excluded.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for an empty path.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The path text, lossily decoded.
    #[must_use]
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buf[..self.len])
    }
}

impl fmt::Display for VnodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Resolves one path of `vnode` with a buffer of `max_len` bytes.
///
/// # Errors
///
/// See [`resolve_in`].
pub fn resolve(vnode: &dyn Vnode, max_len: usize) -> Result<VnodePath, PathError> {
    resolve_in(vnode, max_len, &SystemAllocator::new())
}

/// Resolves one path of `vnode`, taking the `max_len` byte buffer from
/// `allocator`.
///
/// An object may have several paths; any one of them is returned.
///
/// # Errors
///
/// Returns [`PathError::NoMemory`] if the buffer cannot be allocated and
/// [`PathError::Unresolvable`] if the host cannot name the object or reports
/// a length that does not fit the buffer.
pub fn resolve_in(
    vnode: &dyn Vnode,
    max_len: usize,
    allocator: &dyn BufferAllocator,
) -> Result<VnodePath, PathError> {
    let mut buf = allocator
        .allocate(max_len)
        .ok_or(PathError::NoMemory { len: max_len })?;

    let written = vnode.fill_path(&mut buf)?;
    if written == 0 || written > buf.len() {
        return Err(PathError::Unresolvable {
            reason: format!("reported length {written} outside a {max_len} byte buffer"),
        });
    }

    // trust the first NUL over the reported length
    let len = buf[..written]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(written - 1);
    Ok(VnodePath { buf, len })
}

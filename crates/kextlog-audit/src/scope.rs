//! Authorization scopes and their argument decoding.
//!
//! The host calls every listener with an action tag and four loosely typed
//! arguments whose meaning depends on the scope and the action. They are
//! decoded once, here, into one enum per scope.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::host::ProcessRef;
use crate::path::Vnode;

/// Generic scope action: is the caller the superuser.
pub const GENERIC_ISSUSER: u32 = 1;

/// Process scope action: may the caller signal the target.
pub const PROCESS_CANSIGNAL: u32 = 1;
/// Process scope action: may the caller trace the target.
pub const PROCESS_CANTRACE: u32 = 2;

/// File operation: a file was opened.
pub const FILEOP_OPEN: u32 = 1;
/// File operation: a file was closed.
pub const FILEOP_CLOSE: u32 = 2;
/// File operation: a file was renamed.
pub const FILEOP_RENAME: u32 = 3;
/// File operation: two files exchanged their data.
pub const FILEOP_EXCHANGE: u32 = 4;
/// File operation: a hard link was created.
pub const FILEOP_LINK: u32 = 5;
/// File operation: a program was executed.
pub const FILEOP_EXEC: u32 = 6;
/// File operation: a file was deleted.
pub const FILEOP_DELETE: u32 = 7;
/// File operation: a file is about to be renamed.
pub const FILEOP_WILL_RENAME: u32 = 8;

/// Close flag: the file was written while open.
pub const FILEOP_CLOSE_MODIFIED: u32 = 1 << 1;

/// The four scopes a listener can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Superuser checks.
    Generic,
    /// Signal and trace checks between processes.
    Process,
    /// Access checks on filesystem objects.
    Vnode,
    /// Notifications of completed file operations.
    FileOp,
}

impl Scope {
    /// Every scope, in registration order.
    pub const ALL: [Self; 4] = [Self::Generic, Self::Process, Self::Vnode, Self::FileOp];

    /// Host name of the scope.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Generic => "com.apple.kauth.generic",
            Self::Process => "com.apple.kauth.process",
            Self::Vnode => "com.apple.kauth.vnode",
            Self::FileOp => "com.apple.kauth.fileop",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One raw listener argument.
#[derive(Debug, Clone, Default)]
pub enum ScopeArg {
    /// Not supplied, or a null pointer.
    #[default]
    Absent,
    /// An integer.
    Int(i64),
    /// A path string.
    Path(String),
    /// A filesystem object.
    Vnode(Arc<dyn Vnode>),
    /// A process.
    Process(ProcessRef),
    /// An opaque per-call filesystem context.
    Context(u64),
}

impl ScopeArg {
    /// Name of the variant, for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Absent => "nothing",
            Self::Int(_) => "an integer",
            Self::Path(_) => "a path",
            Self::Vnode(_) => "a vnode",
            Self::Process(_) => "a process",
            Self::Context(_) => "a context",
        }
    }
}

/// The four raw arguments of one listener call.
pub type ScopeArgs = [ScopeArg; 4];

/// An argument list that does not match its action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    /// An argument has the wrong kind.
    #[error("{action}: argument {index} should be {expected}, got {found}")]
    Mismatch {
        /// Action being decoded.
        action: &'static str,
        /// Argument position.
        index: usize,
        /// Kind the action needs.
        expected: &'static str,
        /// Kind that was supplied.
        found: &'static str,
    },

    /// An integer argument does not fit its field.
    #[error("{action}: argument {index} value {value} out of range")]
    OutOfRange {
        /// Action being decoded.
        action: &'static str,
        /// Argument position.
        index: usize,
        /// Supplied value.
        value: i64,
    },
}

struct Args<'a> {
    action: &'static str,
    args: &'a ScopeArgs,
}

impl<'a> Args<'a> {
    const fn new(action: &'static str, args: &'a ScopeArgs) -> Self {
        Self { action, args }
    }

    fn mismatch(&self, index: usize, expected: &'static str) -> ArgError {
        ArgError::Mismatch {
            action: self.action,
            index,
            expected,
            found: self.args[index].kind(),
        }
    }

    fn int(&self, index: usize) -> Result<i64, ArgError> {
        match &self.args[index] {
            ScopeArg::Int(value) => Ok(*value),
            _ => Err(self.mismatch(index, "an integer")),
        }
    }

    fn int_as<T: TryFrom<i64>>(&self, index: usize) -> Result<T, ArgError> {
        let value = self.int(index)?;
        T::try_from(value).map_err(|_| ArgError::OutOfRange {
            action: self.action,
            index,
            value,
        })
    }

    fn process(&self, index: usize) -> Result<ProcessRef, ArgError> {
        match &self.args[index] {
            ScopeArg::Process(process) => Ok(*process),
            _ => Err(self.mismatch(index, "a process")),
        }
    }

    fn vnode(&self, index: usize) -> Result<Arc<dyn Vnode>, ArgError> {
        match &self.args[index] {
            ScopeArg::Vnode(vnode) => Ok(Arc::clone(vnode)),
            _ => Err(self.mismatch(index, "a vnode")),
        }
    }

    fn opt_vnode(&self, index: usize) -> Result<Option<Arc<dyn Vnode>>, ArgError> {
        match &self.args[index] {
            ScopeArg::Absent => Ok(None),
            ScopeArg::Vnode(vnode) => Ok(Some(Arc::clone(vnode))),
            _ => Err(self.mismatch(index, "a vnode")),
        }
    }

    fn opt_path(&self, index: usize) -> Result<Option<String>, ArgError> {
        match &self.args[index] {
            ScopeArg::Absent => Ok(None),
            ScopeArg::Path(path) => Ok(Some(path.clone())),
            _ => Err(self.mismatch(index, "a path")),
        }
    }

    fn context(&self, index: usize) -> Result<u64, ArgError> {
        match &self.args[index] {
            ScopeArg::Absent => Ok(0),
            ScopeArg::Context(ctx) => Ok(*ctx),
            _ => Err(self.mismatch(index, "a context")),
        }
    }
}

/// Decoded generic scope action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericAction {
    /// Superuser check.
    IsSuser,
    /// Any other tag.
    Unknown(u32),
}

impl GenericAction {
    /// Decodes an action tag. Generic actions carry no arguments.
    #[must_use]
    pub const fn decode(action: u32) -> Self {
        match action {
            GENERIC_ISSUSER => Self::IsSuser,
            other => Self::Unknown(other),
        }
    }

    /// Action name, `(?)` when unknown.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::IsSuser => "ISSUSER",
            Self::Unknown(_) => "(?)",
        }
    }
}

/// Decoded process scope request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAction {
    /// Caller wants to signal `target`.
    CanSignal {
        /// Process receiving the signal.
        target: ProcessRef,
        /// Signal number.
        signal: i32,
    },
    /// Caller wants to trace `target`.
    CanTrace {
        /// Process to be traced.
        target: ProcessRef,
    },
    /// Any other tag.
    Unknown(u32),
}

impl ProcessAction {
    /// Decodes an action tag and its arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ArgError`] if the arguments do not match the action.
    pub fn decode(action: u32, args: &ScopeArgs) -> Result<Self, ArgError> {
        match action {
            PROCESS_CANSIGNAL => {
                let args = Args::new("CANSIGNAL", args);
                Ok(Self::CanSignal {
                    target: args.process(0)?,
                    signal: args.int_as(1)?,
                })
            }
            PROCESS_CANTRACE => Ok(Self::CanTrace {
                target: Args::new("CANTRACE", args).process(0)?,
            }),
            other => Ok(Self::Unknown(other)),
        }
    }

    /// Action name, `(?)` when unknown.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CanSignal { .. } => "CANSIGNAL",
            Self::CanTrace { .. } => "CANTRACE",
            Self::Unknown(_) => "(?)",
        }
    }
}

/// Rights requested on a filesystem object, one bit per right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VnodeAction(pub u32);

impl VnodeAction {
    /// Read file data, or list a directory.
    pub const READ_DATA: u32 = 1 << 1;
    /// Write file data, or add a file to a directory.
    pub const WRITE_DATA: u32 = 1 << 2;
    /// Execute a file, or search a directory.
    pub const EXECUTE: u32 = 1 << 3;
    /// Delete the object.
    pub const DELETE: u32 = 1 << 4;
    /// Append to a file, or add a subdirectory.
    pub const APPEND_DATA: u32 = 1 << 5;
    /// Delete a directory entry.
    pub const DELETE_CHILD: u32 = 1 << 6;
    /// Read attributes.
    pub const READ_ATTRIBUTES: u32 = 1 << 7;
    /// Write attributes.
    pub const WRITE_ATTRIBUTES: u32 = 1 << 8;
    /// Read extended attributes.
    pub const READ_EXTATTRIBUTES: u32 = 1 << 9;
    /// Write extended attributes.
    pub const WRITE_EXTATTRIBUTES: u32 = 1 << 10;
    /// Read the security descriptor.
    pub const READ_SECURITY: u32 = 1 << 11;
    /// Write the security descriptor.
    pub const WRITE_SECURITY: u32 = 1 << 12;
    /// Take ownership.
    pub const TAKE_OWNERSHIP: u32 = 1 << 13;
    /// Synchronize.
    pub const SYNCHRONIZE: u32 = 1 << 20;
    /// Object is the target of a link.
    pub const LINKTARGET: u32 = 1 << 25;
    /// Check the immutable flag.
    pub const CHECKIMMUTABLE: u32 = 1 << 26;
    /// Search by anyone.
    pub const SEARCHBYANYONE: u32 = 1 << 29;
    /// Ignore the immutable flag.
    pub const NOIMMUTABLE: u32 = 1 << 30;
    /// Access check only.
    pub const ACCESS: u32 = 1 << 31;

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Name of a single right. Four bits mean something else on directories.
    ///
    /// Unknown bits are named `?`.
    #[must_use]
    pub fn token(bit: u32, is_dir: bool) -> &'static str {
        if !crate::invariant!(
            bit.is_power_of_two(),
            "vnode right lookup needs exactly one bit, got {bit:#x}"
        ) {
            return "?";
        }
        match bit {
            Self::READ_DATA if is_dir => "LIST_DIRECTORY",
            Self::READ_DATA => "READ_DATA",
            Self::WRITE_DATA if is_dir => "ADD_FILE",
            Self::WRITE_DATA => "WRITE_DATA",
            Self::EXECUTE if is_dir => "SEARCH",
            Self::EXECUTE => "EXECUTE",
            Self::DELETE => "DELETE",
            Self::APPEND_DATA if is_dir => "ADD_SUBDIRECTORY",
            Self::APPEND_DATA => "APPEND_DATA",
            Self::DELETE_CHILD => "DELETE_CHILD",
            Self::READ_ATTRIBUTES => "READ_ATTRIBUTES",
            Self::WRITE_ATTRIBUTES => "WRITE_ATTRIBUTES",
            Self::READ_EXTATTRIBUTES => "READ_EXTATTRIBUTES",
            Self::WRITE_EXTATTRIBUTES => "WRITE_EXTATTRIBUTES",
            Self::READ_SECURITY => "READ_SECURITY",
            Self::WRITE_SECURITY => "WRITE_SECURITY",
            Self::TAKE_OWNERSHIP => "TAKE_OWNERSHIP",
            Self::SYNCHRONIZE => "SYNCHRONIZE",
            Self::LINKTARGET => "LINKTARGET",
            Self::CHECKIMMUTABLE => "CHECKIMMUTABLE",
            Self::SEARCHBYANYONE => "SEARCHBYANYONE",
            Self::NOIMMUTABLE => "NOIMMUTABLE",
            Self::ACCESS => "ACCESS",
            _ => "?",
        }
    }

    /// Names of every set right, lowest bit first.
    pub fn tokens(self, is_dir: bool) -> impl Iterator<Item = &'static str> {
        let mut rest = self.0;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let bit = rest & rest.wrapping_neg();
            rest &= rest - 1;
            Some(Self::token(bit, is_dir))
        })
    }

    /// Pipe-separated names of every set right, lowest bit first.
    #[must_use]
    pub fn render(self, is_dir: bool) -> String {
        let mut out = String::new();
        for (i, token) in self.tokens(is_dir).enumerate() {
            if i > 0 {
                out.push('|');
            }
            out.push_str(token);
        }
        out
    }
}

/// Decoded vnode scope request.
#[derive(Debug, Clone)]
pub struct VnodeRequest {
    /// Opaque filesystem context of the call.
    pub context: u64,
    /// Object being accessed.
    pub vnode: Arc<dyn Vnode>,
    /// Parent directory, when the host supplies one.
    pub parent: Option<Arc<dyn Vnode>>,
    /// Requested rights.
    pub action: VnodeAction,
}

impl VnodeRequest {
    /// Decodes a vnode scope call.
    ///
    /// # Errors
    ///
    /// Returns [`ArgError`] if argument 1 is not a vnode or the others have
    /// the wrong kind.
    pub fn decode(action: u32, args: &ScopeArgs) -> Result<Self, ArgError> {
        let args = Args::new("vnode", args);
        Ok(Self {
            context: args.context(0)?,
            vnode: args.vnode(1)?,
            parent: args.opt_vnode(2)?,
            action: VnodeAction(action),
        })
    }
}

/// Decoded file operation notification.
///
/// Paths and objects may be missing, notably early in boot and late in
/// shutdown.
#[derive(Debug, Clone)]
pub enum FileOp {
    /// A file was opened.
    Open {
        /// The file.
        vnode: Option<Arc<dyn Vnode>>,
        /// Its path.
        path: Option<String>,
    },
    /// A file was closed.
    Close {
        /// The file.
        vnode: Option<Arc<dyn Vnode>>,
        /// Its path.
        path: Option<String>,
        /// Close flags, see [`FILEOP_CLOSE_MODIFIED`].
        flags: u32,
    },
    /// A file was renamed.
    Rename {
        /// Old path.
        from: Option<String>,
        /// New path.
        to: Option<String>,
    },
    /// Two files exchanged their data.
    Exchange {
        /// First path.
        first: Option<String>,
        /// Second path.
        second: Option<String>,
    },
    /// A hard link was created.
    Link {
        /// Existing path.
        from: Option<String>,
        /// New link.
        to: Option<String>,
    },
    /// A program was executed.
    Exec {
        /// The executable.
        vnode: Option<Arc<dyn Vnode>>,
        /// Its path.
        path: Option<String>,
    },
    /// A file was deleted.
    Delete {
        /// The file.
        vnode: Option<Arc<dyn Vnode>>,
        /// Its path.
        path: Option<String>,
    },
    /// A file is about to be renamed.
    WillRename {
        /// The file.
        vnode: Option<Arc<dyn Vnode>>,
        /// Old path.
        from: Option<String>,
        /// New path.
        to: Option<String>,
    },
    /// Any other tag.
    Unknown(u32),
}

impl FileOp {
    /// Decodes a file operation tag and its arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ArgError`] if an argument has the wrong kind.
    pub fn decode(action: u32, args: &ScopeArgs) -> Result<Self, ArgError> {
        let op = match action {
            FILEOP_OPEN => {
                let a = Args::new("OPEN", args);
                Self::Open {
                    vnode: a.opt_vnode(0)?,
                    path: a.opt_path(1)?,
                }
            }
            FILEOP_CLOSE => {
                let a = Args::new("CLOSE", args);
                Self::Close {
                    vnode: a.opt_vnode(0)?,
                    path: a.opt_path(1)?,
                    flags: a.int_as(2)?,
                }
            }
            FILEOP_RENAME => {
                let a = Args::new("RENAME", args);
                Self::Rename {
                    from: a.opt_path(0)?,
                    to: a.opt_path(1)?,
                }
            }
            FILEOP_EXCHANGE => {
                let a = Args::new("EXCHANGE", args);
                Self::Exchange {
                    first: a.opt_path(0)?,
                    second: a.opt_path(1)?,
                }
            }
            FILEOP_LINK => {
                let a = Args::new("LINK", args);
                Self::Link {
                    from: a.opt_path(0)?,
                    to: a.opt_path(1)?,
                }
            }
            FILEOP_EXEC => {
                let a = Args::new("EXEC", args);
                Self::Exec {
                    vnode: a.opt_vnode(0)?,
                    path: a.opt_path(1)?,
                }
            }
            FILEOP_DELETE => {
                let a = Args::new("DELETE", args);
                Self::Delete {
                    vnode: a.opt_vnode(0)?,
                    path: a.opt_path(1)?,
                }
            }
            FILEOP_WILL_RENAME => {
                let a = Args::new("WILL_RENAME", args);
                Self::WillRename {
                    vnode: a.opt_vnode(0)?,
                    from: a.opt_path(1)?,
                    to: a.opt_path(2)?,
                }
            }
            other => Self::Unknown(other),
        };
        Ok(op)
    }

    /// Operation name, `?` when unknown.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "OPEN",
            Self::Close { .. } => "CLOSE",
            Self::Rename { .. } => "RENAME",
            Self::Exchange { .. } => "EXCHANGE",
            Self::Link { .. } => "LINK",
            Self::Exec { .. } => "EXEC",
            Self::Delete { .. } => "DELETE",
            Self::WillRename { .. } => "WILL_RENAME",
            Self::Unknown(_) => "?",
        }
    }
}

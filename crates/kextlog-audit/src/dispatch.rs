//! Interception callbacks for the four authorization scopes.
//!
//! Every callback enters the quiescence gate, decodes its arguments, emits
//! one record and defers. Nothing here ever allows or denies an operation.

use std::fmt;
use std::sync::Arc;

use kextlog_core::Level;
use tracing::warn;

use crate::context::Kextlog;
use crate::error::Result;
use crate::host::{Credential, ProcessRef};
use crate::path::{resolve_in, Vnode};
use crate::registry::{Registration, ScopeRegistry};
use crate::scope::{
    ArgError, FileOp, GenericAction, ProcessAction, Scope, ScopeArg, ScopeArgs, VnodeRequest,
};

/// Answer returned to the host for every intercepted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No opinion; other listeners and the host decide.
    Defer,
}

/// One listener call as delivered by the host.
#[derive(Debug, Clone)]
pub struct ScopeRequest {
    /// Credential of the actor.
    pub credential: Credential,
    /// Scope-specific action tag.
    pub action: u32,
    /// Raw arguments.
    pub args: ScopeArgs,
}

impl ScopeRequest {
    /// Creates a request with every argument absent.
    #[must_use]
    pub fn new(credential: Credential, action: u32) -> Self {
        Self {
            credential,
            action,
            args: ScopeArgs::default(),
        }
    }

    /// Sets argument `index`. Indexes past the fourth are ignored.
    #[must_use]
    pub fn arg(mut self, index: usize, arg: ScopeArg) -> Self {
        if let Some(slot) = self.args.get_mut(index) {
            *slot = arg;
        }
        self
    }
}

/// Routes listener calls to the scope callbacks.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ctx: Arc<Kextlog>,
}

impl Dispatcher {
    /// Creates a dispatcher over `ctx`.
    #[must_use]
    pub const fn new(ctx: Arc<Kextlog>) -> Self {
        Self { ctx }
    }

    /// Shared observer state.
    #[must_use]
    pub const fn context(&self) -> &Arc<Kextlog> {
        &self.ctx
    }

    /// Attaches one listener per scope through `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScopeRegistration`](crate::Error::ScopeRegistration)
    /// if the registry refuses a listener, after detaching the ones already
    /// attached and closing the gate.
    pub fn register(&self, registry: Arc<dyn ScopeRegistry>) -> Result<Registration> {
        Registration::attach(registry, self)
    }

    /// Handles one call for `scope`.
    pub fn dispatch(&self, scope: Scope, request: &ScopeRequest) -> Verdict {
        match scope {
            Scope::Generic => self.generic(request),
            Scope::Process => self.process(request),
            Scope::Vnode => self.vnode(request),
            Scope::FileOp => self.fileop(request),
        }
    }

    /// Generic scope: superuser checks.
    pub fn generic(&self, request: &ScopeRequest) -> Verdict {
        let Some(_guard) = self.ctx.gate().enter() else {
            return Verdict::Defer;
        };
        let actor = self.actor(&request.credential);
        let action = GenericAction::decode(request.action);
        self.ctx.log(
            Level::Info,
            format_args!("generic  act: {:#x}({}) {actor}", request.action, action.name()),
        );
        Verdict::Defer
    }

    /// Process scope: signal and trace checks.
    pub fn process(&self, request: &ScopeRequest) -> Verdict {
        let Some(_guard) = self.ctx.gate().enter() else {
            return Verdict::Defer;
        };
        let actor = self.actor(&request.credential);
        let act = request.action;

        match ProcessAction::decode(act, &request.args) {
            Ok(action @ ProcessAction::CanSignal { target, signal }) => {
                let dst = self.process_name(target);
                self.ctx.log(
                    Level::Info,
                    format_args!(
                        "process  act: {act:#x}({}) {actor} dst: {} {dst} sig: {signal}",
                        action.name(),
                        target.pid
                    ),
                );
            }
            Ok(action @ ProcessAction::CanTrace { target }) => {
                let dst = self.process_name(target);
                self.ctx.log(
                    Level::Warning,
                    format_args!(
                        "process  act: {act:#x}({}) {actor} dst: {} {dst}",
                        action.name(),
                        target.pid
                    ),
                );
            }
            Ok(ProcessAction::Unknown(_)) => {
                self.ctx.log(
                    Level::Warning,
                    format_args!("unknown action {act:#x} in process scope"),
                );
            }
            Err(e) => self.malformed(Scope::Process, &e),
        }
        Verdict::Defer
    }

    /// Vnode scope: access checks on filesystem objects.
    pub fn vnode(&self, request: &ScopeRequest) -> Verdict {
        let Some(_guard) = self.ctx.gate().enter() else {
            return Verdict::Defer;
        };
        let actor = self.actor(&request.credential);

        let decoded = match VnodeRequest::decode(request.action, &request.args) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.malformed(Scope::Vnode, &e);
                return Verdict::Defer;
            }
        };
        let vp = decoded.vnode.as_ref();
        let vt = vp.vtype();

        let path = match resolve_in(vp, self.ctx.config().max_path_len, self.ctx.allocator()) {
            Ok(path) => path,
            Err(e) => {
                self.ctx.log(
                    Level::Error,
                    format_args!(
                        "vnode path lookup failed  vp: {:#x} vid: {:#x} vt: {} ({e})",
                        vp.identity(),
                        vp.vid(),
                        vt.as_u32()
                    ),
                );
                return Verdict::Defer;
            }
        };

        let rights = decoded.action.render(vp.is_dir());
        self.ctx.log(
            Level::Info,
            format_args!(
                "vnode  act: {:#x}({rights}) vp: {:#x} {} {vt} {path} dvp: {} {actor}",
                decoded.action.bits(),
                vp.identity(),
                vt.as_u32(),
                VnodeId(decoded.parent.as_deref()),
            ),
        );
        Verdict::Defer
    }

    /// File operation scope: completed operations.
    pub fn fileop(&self, request: &ScopeRequest) -> Verdict {
        let Some(_guard) = self.ctx.gate().enter() else {
            return Verdict::Defer;
        };
        let actor = self.actor(&request.credential);
        let act = request.action;

        let op = match FileOp::decode(act, &request.args) {
            Ok(op) => op,
            Err(e) => {
                self.malformed(Scope::FileOp, &e);
                return Verdict::Defer;
            }
        };
        let name = op.name();

        match &op {
            FileOp::Open { vnode, path }
            | FileOp::Exec { vnode, path }
            | FileOp::Delete { vnode, path } => self.ctx.log(
                Level::Info,
                format_args!(
                    "fileop  act: {act:#x}({name}) vp: {} {} {actor}",
                    VnodeBrief(vnode.as_deref()),
                    OrNull(path.as_deref())
                ),
            ),
            FileOp::Close { vnode, path, flags } => self.ctx.log(
                Level::Info,
                format_args!(
                    "fileop  act: {act:#x}({name}) vp: {} {} flags: {flags:#x} {actor}",
                    VnodeBrief(vnode.as_deref()),
                    OrNull(path.as_deref())
                ),
            ),
            FileOp::Rename { from, to } => self.ctx.log(
                Level::Info,
                format_args!(
                    "fileop  act: {act:#x}({name}) {} -> {} {actor}",
                    OrNull(from.as_deref()),
                    OrNull(to.as_deref())
                ),
            ),
            FileOp::Exchange { first, second } => self.ctx.log(
                Level::Info,
                format_args!(
                    "fileop  act: {act:#x}({name}) {} <=> {} {actor}",
                    OrNull(first.as_deref()),
                    OrNull(second.as_deref())
                ),
            ),
            FileOp::Link { from, to } => self.ctx.log(
                Level::Info,
                format_args!(
                    "fileop  act: {act:#x}({name}) {} ~> {} {actor}",
                    OrNull(from.as_deref()),
                    OrNull(to.as_deref())
                ),
            ),
            FileOp::WillRename { vnode, from, to } => self.ctx.log(
                Level::Info,
                format_args!(
                    "fileop  act: {act:#x}({name}) vp: {} {} -> {} {actor}",
                    VnodeBrief(vnode.as_deref()),
                    OrNull(from.as_deref()),
                    OrNull(to.as_deref())
                ),
            ),
            FileOp::Unknown(_) => self.ctx.log(
                Level::Warning,
                format_args!("unknown action {act:#x} in fileop scope"),
            ),
        };
        Verdict::Defer
    }

    fn actor(&self, credential: &Credential) -> Actor {
        let runtime = self.ctx.runtime();
        Actor {
            uid: credential.uid,
            pid: runtime.current_pid(),
            name: runtime.current_proc_name(),
        }
    }

    fn process_name(&self, process: ProcessRef) -> String {
        self.ctx
            .runtime()
            .proc_name(process.pid)
            .unwrap_or_else(|| "?".to_string())
    }

    fn malformed(&self, scope: Scope, error: &ArgError) {
        warn!(%scope, %error, "Malformed scope arguments");
        self.ctx.log(
            Level::Error,
            format_args!("malformed arguments in {scope}: {error}"),
        );
    }
}

struct Actor {
    uid: u32,
    pid: i32,
    name: String,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid: {} pid: {} {}", self.uid, self.pid, self.name)
    }
}

struct VnodeId<'a>(Option<&'a dyn Vnode>);

impl fmt::Display for VnodeId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(vnode) => write!(f, "{:#x}", vnode.identity()),
            None => f.write_str("(null)"),
        }
    }
}

/// Identity and numeric type of an optional object.
struct VnodeBrief<'a>(Option<&'a dyn Vnode>);

impl fmt::Display for VnodeBrief<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(vnode) => write!(f, "{:#x} {}", vnode.identity(), vnode.vtype().as_u32()),
            None => f.write_str("(null)"),
        }
    }
}

struct OrNull<'a>(Option<&'a str>);

impl fmt::Display for OrNull<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.unwrap_or("(null)"))
    }
}

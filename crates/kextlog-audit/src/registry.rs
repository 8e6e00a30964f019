//! Attaching and detaching the scope listeners.

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::context::Kextlog;
use crate::dispatch::{Dispatcher, ScopeRequest, Verdict};
use crate::error::{Error, Result};
use crate::scope::Scope;

/// Callback the host invokes for every authorization request in a scope.
pub type ScopeCallback = Arc<dyn Fn(&ScopeRequest) -> Verdict + Send + Sync>;

/// Handle of an attached listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// The host refused a listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ListenError {
    /// Reason given by the host.
    pub reason: String,
}

impl ListenError {
    /// Creates a listen error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Host service that calls listeners for authorization requests.
pub trait ScopeRegistry: Send + Sync + Debug {
    /// Attaches `callback` to `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`ListenError`] if the host refuses the listener.
    fn listen(&self, scope: Scope, callback: ScopeCallback) -> std::result::Result<ListenerId, ListenError>;

    /// Detaches a listener. The host stops starting new calls into it, but
    /// calls already running may still be in flight.
    fn unlisten(&self, id: ListenerId);
}

/// The attached listeners of one observer.
///
/// Dropping it has the same effect as [`deregister`](Self::deregister).
#[derive(Debug)]
#[must_use = "dropping the registration detaches every listener"]
pub struct Registration {
    registry: Arc<dyn ScopeRegistry>,
    ctx: Arc<Kextlog>,
    listeners: Vec<(Scope, ListenerId)>,
    active: bool,
}

impl Registration {
    pub(crate) fn attach(registry: Arc<dyn ScopeRegistry>, dispatcher: &Dispatcher) -> Result<Self> {
        let mut registration = Self {
            registry,
            ctx: Arc::clone(dispatcher.context()),
            listeners: Vec::with_capacity(Scope::ALL.len()),
            active: true,
        };

        for scope in Scope::ALL {
            let handler = dispatcher.clone();
            let callback: ScopeCallback =
                Arc::new(move |request: &ScopeRequest| handler.dispatch(scope, request));
            match registration.registry.listen(scope, callback) {
                Ok(id) => {
                    debug!(%scope, id = id.0, "Scope listener attached");
                    registration.listeners.push((scope, id));
                }
                Err(e) => {
                    error!(%scope, error = %e, "Failed to attach scope listener");
                    registration.teardown();
                    return Err(Error::ScopeRegistration {
                        scope,
                        reason: e.reason,
                    });
                }
            }
        }

        Ok(registration)
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Scopes with an attached listener.
    pub fn scopes(&self) -> impl Iterator<Item = Scope> + '_ {
        self.listeners.iter().map(|(scope, _)| *scope)
    }

    /// Detaches every listener, then blocks until callbacks already running
    /// have returned. No callback touches the observer afterwards.
    pub fn deregister(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        for (scope, id) in self.listeners.drain(..) {
            self.registry.unlisten(id);
            debug!(%scope, id = id.0, "Scope listener detached");
        }
        self.ctx.gate().invalidate();
        info!("Scope listeners drained");
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.teardown();
    }
}

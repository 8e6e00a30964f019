//! The observer's shared state, owned in one place.

use std::fmt;
use std::sync::Arc;

use kextlog_core::Level;
use tracing::info;

use crate::buffer::{BufferAllocator, SystemAllocator};
use crate::channel::{ChannelError, ControlChannel};
use crate::config::KextlogConfig;
use crate::dispatch::Dispatcher;
use crate::encoder::{Delivery, Logger};
use crate::error::{Error, Result};
use crate::gate::QuiescenceGate;
use crate::host::{HostRuntime, SystemRuntime};
use crate::registry::{Registration, ScopeRegistry};
use crate::socket::ControlSocket;
use crate::stats::{Statistics, StatisticsSnapshot};
use crate::syslog::{SystemLog, TracingSystemLog};

/// One observer instance: gate, channel, encoder and host seams.
///
/// Share it behind an [`Arc`]; every callback reaches the same state.
#[derive(Debug)]
pub struct Kextlog {
    config: KextlogConfig,
    gate: QuiescenceGate,
    logger: Logger,
    runtime: Arc<dyn HostRuntime>,
    allocator: Arc<dyn BufferAllocator>,
}

impl Kextlog {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> KextlogBuilder {
        KextlogBuilder::new()
    }

    /// Attaches the four scope listeners through `registry`.
    ///
    /// Dropping or [deregistering](Registration::deregister) the returned
    /// registration detaches them and waits for in-flight callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScopeRegistration`] if a listener is refused. The
    /// listeners attached before it are detached and the gate is closed.
    pub fn start(self: &Arc<Self>, registry: Arc<dyn ScopeRegistry>) -> Result<Registration> {
        let registration = Dispatcher::new(Arc::clone(self)).register(registry)?;
        info!(
            control = %self.config.control_name,
            listeners = registration.listener_count(),
            "kextlog started"
        );
        Ok(registration)
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &KextlogConfig {
        &self.config
    }

    /// Gate every callback passes through.
    #[must_use]
    pub const fn gate(&self) -> &QuiescenceGate {
        &self.gate
    }

    /// Record encoder.
    #[must_use]
    pub const fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Control channel.
    #[must_use]
    pub fn channel(&self) -> &ControlChannel {
        self.logger.channel()
    }

    /// Host runtime.
    #[must_use]
    pub fn runtime(&self) -> &dyn HostRuntime {
        self.runtime.as_ref()
    }

    /// Allocator for scratch buffers.
    #[must_use]
    pub fn allocator(&self) -> &dyn BufferAllocator {
        self.allocator.as_ref()
    }

    /// Current routing counters.
    #[must_use]
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.logger.statistics().snapshot()
    }

    /// Attaches consumer `unit` to the control channel.
    ///
    /// # Errors
    ///
    /// See [`ControlChannel::connect`].
    pub fn connect(&self, unit: u32) -> std::result::Result<(), ChannelError> {
        self.channel().connect(unit)
    }

    /// Detaches consumer `unit`; false if it was not attached.
    pub fn disconnect(&self, unit: u32) -> bool {
        self.channel().disconnect(unit)
    }

    /// Emits one record.
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) -> Delivery {
        self.logger.log(level, args)
    }
}

/// Builder for [`Kextlog`].
#[derive(Debug, Default)]
pub struct KextlogBuilder {
    config: Option<KextlogConfig>,
    runtime: Option<Arc<dyn HostRuntime>>,
    socket: Option<Arc<dyn ControlSocket>>,
    syslog: Option<Arc<dyn SystemLog>>,
    allocator: Option<Arc<dyn BufferAllocator>>,
    statistics: Option<Arc<Statistics>>,
}

impl KextlogBuilder {
    /// Creates a builder with every seam unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration. Defaults to [`KextlogConfig::default`].
    #[must_use]
    pub fn config(mut self, config: KextlogConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the host runtime. Defaults to [`SystemRuntime`].
    #[must_use]
    pub fn runtime(mut self, runtime: Arc<dyn HostRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Sets the socket records are delivered through. Required.
    #[must_use]
    pub fn socket(mut self, socket: Arc<dyn ControlSocket>) -> Self {
        self.socket = Some(socket);
        self
    }

    /// Sets the last-resort system log. Defaults to [`TracingSystemLog`].
    #[must_use]
    pub fn syslog(mut self, syslog: Arc<dyn SystemLog>) -> Self {
        self.syslog = Some(syslog);
        self
    }

    /// Sets the buffer allocator. Defaults to [`SystemAllocator`].
    #[must_use]
    pub fn allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Shares existing routing counters.
    #[must_use]
    pub fn statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Builds the observer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if no socket was set or the
    /// configuration does not validate.
    pub fn build(self) -> Result<Kextlog> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let socket = self.socket.ok_or_else(|| Error::InvalidConfig {
            reason: "a control socket is required".to_string(),
        })?;
        let runtime = self
            .runtime
            .unwrap_or_else(|| Arc::new(SystemRuntime::new()));
        let syslog = self
            .syslog
            .unwrap_or_else(|| Arc::new(TracingSystemLog::new()));
        let allocator = self
            .allocator
            .unwrap_or_else(|| Arc::new(SystemAllocator::new()));
        let statistics = self.statistics.unwrap_or_default();

        let channel = Arc::new(ControlChannel::new(socket));
        let logger = Logger::new(channel, Arc::clone(&runtime), syslog, &config)
            .with_allocator(Arc::clone(&allocator))
            .with_statistics(statistics);

        Ok(Kextlog {
            gate: QuiescenceGate::with_poll_interval(config.drain_poll_interval()),
            config,
            logger,
            runtime,
            allocator,
        })
    }
}

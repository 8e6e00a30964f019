//! Observer configuration.

use std::time::Duration;

use kextlog_core::MAX_PAYLOAD_LEN;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default control channel name.
pub const DEFAULT_CONTROL_NAME: &str = "net.trineo.kext.bsd_kext_log.kctl";

/// Default host maximum path length, trailing NUL included.
pub const DEFAULT_MAX_PATH_LEN: usize = 1024;

/// Default size of the last-resort system log buffer.
pub const DEFAULT_SYSLOG_BUFFER_SIZE: usize = 4096;

/// Configuration for a [`Kextlog`](crate::Kextlog) instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KextlogConfig {
    /// Name the control channel is registered under.
    pub control_name: String,

    /// Size of the buffer handed to the host path lookup.
    pub max_path_len: usize,

    /// Size of the last-resort system log buffer; longer messages are cut.
    pub syslog_buffer_size: usize,

    /// Largest payload a record may carry before it is truncated.
    pub max_payload_len: usize,

    /// Longest single sleep while teardown waits for callbacks to drain.
    pub drain_poll_interval_ms: u64,
}

impl Default for KextlogConfig {
    fn default() -> Self {
        Self {
            control_name: DEFAULT_CONTROL_NAME.to_string(),
            max_path_len: DEFAULT_MAX_PATH_LEN,
            syslog_buffer_size: DEFAULT_SYSLOG_BUFFER_SIZE,
            max_payload_len: MAX_PAYLOAD_LEN - 1,
            drain_poll_interval_ms: 1,
        }
    }
}

impl KextlogConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> KextlogConfigBuilder {
        KextlogConfigBuilder::default()
    }

    /// Parses and validates a JSON configuration. Missing fields take their
    /// default values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] for malformed JSON and
    /// [`Error::InvalidConfig`] if validation fails.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.control_name.is_empty() {
            return Err(invalid("control_name cannot be empty"));
        }
        if self.max_path_len < 2 {
            return Err(invalid("max_path_len must be at least 2"));
        }
        if self.syslog_buffer_size < 16 {
            return Err(invalid("syslog_buffer_size must be at least 16"));
        }
        if self.max_payload_len == 0 || self.max_payload_len >= MAX_PAYLOAD_LEN {
            return Err(invalid(format!(
                "max_payload_len must be between 1 and {}",
                MAX_PAYLOAD_LEN - 1
            )));
        }
        if self.drain_poll_interval_ms == 0 {
            return Err(invalid("drain_poll_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Returns the drain poll interval as a [`Duration`].
    #[must_use]
    pub const fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidConfig {
        reason: reason.into(),
    }
}

/// Builder for [`KextlogConfig`].
#[derive(Debug, Default)]
pub struct KextlogConfigBuilder {
    control_name: Option<String>,
    max_path_len: Option<usize>,
    syslog_buffer_size: Option<usize>,
    max_payload_len: Option<usize>,
    drain_poll_interval: Option<Duration>,
}

impl KextlogConfigBuilder {
    /// Sets the control channel name.
    #[must_use]
    pub fn control_name(mut self, name: impl Into<String>) -> Self {
        self.control_name = Some(name.into());
        self
    }

    /// Sets the path lookup buffer size.
    #[must_use]
    pub fn max_path_len(mut self, len: usize) -> Self {
        self.max_path_len = Some(len);
        self
    }

    /// Sets the system log buffer size.
    #[must_use]
    pub fn syslog_buffer_size(mut self, size: usize) -> Self {
        self.syslog_buffer_size = Some(size);
        self
    }

    /// Sets the largest record payload.
    #[must_use]
    pub fn max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = Some(len);
        self
    }

    /// Sets the drain poll interval, rounded down to whole milliseconds.
    #[must_use]
    pub fn drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = Some(interval);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if validation fails.
    pub fn build(self) -> Result<KextlogConfig> {
        let defaults = KextlogConfig::default();
        let config = KextlogConfig {
            control_name: self.control_name.unwrap_or(defaults.control_name),
            max_path_len: self.max_path_len.unwrap_or(defaults.max_path_len),
            syslog_buffer_size: self
                .syslog_buffer_size
                .unwrap_or(defaults.syslog_buffer_size),
            max_payload_len: self.max_payload_len.unwrap_or(defaults.max_payload_len),
            drain_poll_interval_ms: self.drain_poll_interval.map_or(
                defaults.drain_poll_interval_ms,
                |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
            ),
        };
        config.validate()?;
        Ok(config)
    }
}

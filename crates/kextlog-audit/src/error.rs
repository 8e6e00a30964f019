//! Error types for the kextlog producer.

use thiserror::Error;

use crate::scope::Scope;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to whoever starts or configures the observer.
///
/// Everything that happens inside an interception callback is absorbed
/// locally; only start-up and configuration problems reach the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// A scope listener could not be attached. Listeners attached before the
    /// failure have been detached again.
    #[error("Failed to listen on scope {scope}: {reason}")]
    ScopeRegistration {
        /// Scope that refused the listener.
        scope: Scope,
        /// Reason reported by the host.
        reason: String,
    },

    /// Configuration is invalid.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// Configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

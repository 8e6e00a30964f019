//! Severity levels carried in every record header.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Severity of a log record.
///
/// The discriminants are the on-wire values of the header `level` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum Level {
    /// Very fine-grained tracing.
    Trace = 0,
    /// Debugging detail.
    Debug = 1,
    /// Informational event.
    #[default]
    Info = 2,
    /// Something looks suspicious.
    Warning = 3,
    /// Something failed.
    Error = 4,
}

impl Level {
    /// All levels, lowest first.
    pub const ALL: [Self; 5] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
    ];

    /// Returns the on-wire value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns the short uppercase label used in text output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl TryFrom<u32> for Level {
    type Error = DecodeError;

    fn try_from(value: u32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Level::Trace),
            1 => Ok(Level::Debug),
            2 => Ok(Level::Info),
            3 => Ok(Level::Warning),
            4 => Ok(Level::Error),
            other => Err(DecodeError::UnknownLevel { value: other }),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Error types for the kextlog wire format.

use thiserror::Error;

/// Result type alias using [`DecodeError`] as the error type.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Errors raised while parsing record bytes.
///
/// None of these are fatal to a stream: the [`StreamDecoder`](crate::StreamDecoder)
/// turns them into recoverable events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than a full header were available.
    #[error("short header: need {needed} bytes, have {available}")]
    ShortHeader {
        /// Bytes required for a header.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The declared payload runs past the available bytes.
    #[error("incomplete payload: declared {declared} bytes, have {available}")]
    IncompletePayload {
        /// Payload size declared in the header.
        declared: usize,
        /// Bytes available after the header.
        available: usize,
    },

    /// The header canary did not match, the stream is misaligned or corrupt.
    #[error("bad record canary: {found:#x}")]
    BadCanary {
        /// Canary value found in the header.
        found: u32,
    },

    /// The header carried an unknown severity level.
    #[error("unknown severity level: {value}")]
    UnknownLevel {
        /// Raw level value.
        value: u32,
    },

    /// The record would not fit the 32-bit size field.
    #[error("record payload of {len} bytes exceeds the wire size limit")]
    Oversized {
        /// Payload length in bytes.
        len: usize,
    },
}

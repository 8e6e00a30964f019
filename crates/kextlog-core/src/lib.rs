//! # kextlog Core
//!
//! Wire format shared by the kextlog producer and its consumers.
//!
//! The producer streams variable-length records over a one-reader control
//! channel. Each record is a fixed header followed by a length-delimited text
//! payload. This crate provides:
//!
//! - [`Level`] - record severity
//! - [`RecordFlags`] - dropped-predecessor and truncated bits
//! - [`RecordHeader`] / [`Record`] - header layout, parsing and serialization
//! - [`StreamDecoder`] - incremental decoder that resynchronizes on record
//!   boundaries and recovers from corrupt batches
//!
//! ## Example
//!
//! ```rust
//! use kextlog_core::{DecodeEvent, Level, Record, RecordFlags, StreamDecoder};
//!
//! let bytes = Record::from_text(1, 2, 3, Level::Info, RecordFlags::EMPTY, "hello")
//!     .unwrap()
//!     .to_bytes();
//!
//! let mut decoder = StreamDecoder::new();
//! let events = decoder.push(&bytes);
//! assert!(matches!(&events[0], DecodeEvent::Record(r) if r.message() == "hello"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod decoder;
pub mod error;
pub mod level;
pub mod record;


pub use decoder::{DecodeEvent, DecoderStats, StreamDecoder};
pub use error::{DecodeError, Result};
pub use level::Level;
pub use record::{
    flags_of, or_flags_in_place, Record, RecordFlags, RecordHeader, CANARY, HEADER_LEN,
    MAX_PAYLOAD_LEN,
};

//! Record header layout and flag bits.
//!
//! A record on the control channel is a fixed 40-byte little-endian header
//! immediately followed by `size` payload bytes:
//!
//! | offset | size | field |
//! |-------:|-----:|-------|
//! | 0  | 4 | pid |
//! | 4  | 4 | reserved, zero |
//! | 8  | 8 | thread id |
//! | 16 | 8 | timestamp (host absolute time) |
//! | 24 | 4 | level |
//! | 28 | 4 | flags |
//! | 32 | 4 | payload size, trailing NUL included |
//! | 36 | 4 | canary, always [`CANARY`] |

use std::borrow::Cow;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};
use crate::level::Level;

/// Size of the fixed record header in bytes.
pub const HEADER_LEN: usize = 40;

/// Canary stored in every header (`"face"` read as a little-endian `u32`).
pub const CANARY: u32 = 0x6563_6166;

/// Largest payload the 32-bit size field can describe.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

const PID_OFFSET: usize = 0;
const TID_OFFSET: usize = 8;
const TIMESTAMP_OFFSET: usize = 16;
const LEVEL_OFFSET: usize = 24;
const FLAGS_OFFSET: usize = 28;
const SIZE_OFFSET: usize = 32;
const CANARY_OFFSET: usize = 36;

/// Flag bits surfaced to the consumer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordFlags(u32);

impl RecordFlags {
    /// No flags.
    pub const EMPTY: Self = Self(0);
    /// At least one record directly before this one could not be delivered.
    pub const DROPPED: Self = Self(0x1);
    /// This record's payload was shortened.
    pub const TRUNCATED: Self = Self(0x2);

    /// Builds flags from raw bits, keeping unknown bits.
    #[must_use]
    pub const fn from_bits_retain(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for RecordFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RecordFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl fmt::Display for RecordFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut sep = "";
        if self.contains(Self::DROPPED) {
            f.write_str("DROPPED")?;
            sep = "|";
        }
        if self.contains(Self::TRUNCATED) {
            write!(f, "{sep}TRUNCATED")?;
            sep = "|";
        }
        let unknown = self.0 & !(Self::DROPPED.0 | Self::TRUNCATED.0);
        if unknown != 0 {
            write!(f, "{sep}{unknown:#x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RecordFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordFlags({self})")
    }
}

/// Decoded fixed header of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Process id of the actor that emitted the record.
    pub pid: i32,
    /// Thread id of the emitting execution unit.
    pub tid: u64,
    /// Monotonic host timestamp.
    pub timestamp: u64,
    /// Severity.
    pub level: Level,
    /// Flag bits.
    pub flags: RecordFlags,
    /// Payload size in bytes, trailing NUL included.
    pub size: u32,
}

impl RecordHeader {
    /// Serializes the header, canary included.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[PID_OFFSET..PID_OFFSET + 4].copy_from_slice(&self.pid.to_le_bytes());
        out[TID_OFFSET..TID_OFFSET + 8].copy_from_slice(&self.tid.to_le_bytes());
        out[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8].copy_from_slice(&self.timestamp.to_le_bytes());
        out[LEVEL_OFFSET..LEVEL_OFFSET + 4].copy_from_slice(&self.level.as_u32().to_le_bytes());
        out[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&self.size.to_le_bytes());
        out[CANARY_OFFSET..CANARY_OFFSET + 4].copy_from_slice(&CANARY.to_le_bytes());
        out
    }

    /// Parses a header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ShortHeader`] if fewer than [`HEADER_LEN`] bytes
    /// are available, [`DecodeError::BadCanary`] on a canary mismatch and
    /// [`DecodeError::UnknownLevel`] for an out-of-range level.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::ShortHeader {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }

        let canary = read_u32(bytes, CANARY_OFFSET);
        if canary != CANARY {
            return Err(DecodeError::BadCanary { found: canary });
        }

        Ok(Self {
            pid: i32::from_le_bytes(array_at(bytes, PID_OFFSET)),
            tid: read_u64(bytes, TID_OFFSET),
            timestamp: read_u64(bytes, TIMESTAMP_OFFSET),
            level: Level::try_from(read_u32(bytes, LEVEL_OFFSET))?,
            flags: RecordFlags::from_bits_retain(read_u32(bytes, FLAGS_OFFSET)),
            size: read_u32(bytes, SIZE_OFFSET),
        })
    }

    /// Total record length on the wire.
    #[must_use]
    pub const fn record_len(&self) -> usize {
        HEADER_LEN + self.size as usize
    }
}

/// ORs `flags` into the header of an already serialized record.
///
/// Returns false, leaving `record` untouched, if it is shorter than a header.
pub fn or_flags_in_place(record: &mut [u8], flags: RecordFlags) -> bool {
    if record.len() < HEADER_LEN {
        return false;
    }
    let current = read_u32(record, FLAGS_OFFSET);
    let updated = current | flags.bits();
    record[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&updated.to_le_bytes());
    true
}

/// Reads the flags of a serialized record without validating the rest.
#[must_use]
pub fn flags_of(record: &[u8]) -> Option<RecordFlags> {
    (record.len() >= HEADER_LEN).then(|| RecordFlags::from_bits_retain(read_u32(record, FLAGS_OFFSET)))
}

fn array_at<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(array_at(bytes, offset))
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(array_at(bytes, offset))
}

/// A complete record: header plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Fixed header.
    pub header: RecordHeader,
    /// Payload exactly as transmitted, trailing NUL included.
    pub payload: Vec<u8>,
}

impl Record {
    /// Builds a record around `text`, appending the trailing NUL and setting
    /// the header size.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Oversized`] if the payload does not fit the
    /// 32-bit size field.
    pub fn from_text(
        pid: i32,
        tid: u64,
        timestamp: u64,
        level: Level,
        flags: RecordFlags,
        text: &str,
    ) -> Result<Self> {
        let len = text.len();
        let size = len
            .checked_add(1)
            .and_then(|size| u32::try_from(size).ok())
            .ok_or(DecodeError::Oversized { len })?;
        let mut payload = Vec::with_capacity(size as usize);
        payload.extend_from_slice(text.as_bytes());
        payload.push(0);

        Ok(Self {
            header: RecordHeader {
                pid,
                tid,
                timestamp,
                level,
                flags,
                size,
            },
            payload,
        })
    }

    /// Parses one complete record from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns the header errors of [`RecordHeader::parse`] or
    /// [`DecodeError::IncompletePayload`] if the payload is cut short.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = RecordHeader::parse(bytes)?;
        let declared = header.size as usize;
        let available = bytes.len() - HEADER_LEN;
        if declared > available {
            return Err(DecodeError::IncompletePayload {
                declared,
                available,
            });
        }
        Ok(Self {
            header,
            payload: bytes[HEADER_LEN..HEADER_LEN + declared].to_vec(),
        })
    }

    /// Serializes the record.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Returns the payload text up to the first NUL, lossily decoded.
    #[must_use]
    pub fn message(&self) -> Cow<'_, str> {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.payload.len());
        String::from_utf8_lossy(&self.payload[..end])
    }

    /// Returns true if the dropped-predecessor flag is set.
    #[must_use]
    pub const fn is_dropped_predecessor(&self) -> bool {
        self.header.flags.contains(RecordFlags::DROPPED)
    }

    /// Returns true if the truncated flag is set.
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.header.flags.contains(RecordFlags::TRUNCATED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RecordHeader {
        RecordHeader {
            pid: 42,
            tid: 0x1234,
            timestamp: 987_654_321,
            level: Level::Warning,
            flags: RecordFlags::TRUNCATED,
            size: 6,
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample_header().to_bytes();
        assert_eq!(&bytes[0..4], &42i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[24..28], &3u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &2u32.to_le_bytes());
        assert_eq!(&bytes[36..40], b"face");
    }

    #[test]
    fn test_header_parse() {
        let header = sample_header();
        assert_eq!(RecordHeader::parse(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn test_header_parse_short() {
        let bytes = sample_header().to_bytes();
        let err = RecordHeader::parse(&bytes[..39]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::ShortHeader {
                needed: 40,
                available: 39
            }
        );
    }

    #[test]
    fn test_header_parse_bad_canary() {
        let mut bytes = sample_header().to_bytes();
        bytes[36] = 0;
        assert!(matches!(
            RecordHeader::parse(&bytes),
            Err(DecodeError::BadCanary { .. })
        ));
    }

    #[test]
    fn test_or_flags_in_place() {
        let mut record =
            Record::from_text(1, 2, 3, Level::Info, RecordFlags::TRUNCATED, "hi").unwrap().to_bytes();
        assert!(or_flags_in_place(&mut record, RecordFlags::DROPPED));
        assert_eq!(
            flags_of(&record),
            Some(RecordFlags::DROPPED | RecordFlags::TRUNCATED)
        );
        assert!(!or_flags_in_place(&mut record[..10], RecordFlags::DROPPED));
    }

    #[test]
    fn test_record_from_text_counts_terminator() {
        let record = Record::from_text(7, 8, 9, Level::Debug, RecordFlags::EMPTY, "hello").unwrap();
        assert_eq!(record.header.size, 6);
        assert_eq!(record.payload.last(), Some(&0));
        assert_eq!(record.message(), "hello");
        assert_eq!(record.to_bytes().len(), HEADER_LEN + 6);
    }

    #[test]
    fn test_record_parse_incomplete_payload() {
        let bytes = Record::from_text(7, 8, 9, Level::Debug, RecordFlags::EMPTY, "hello")
            .unwrap()
            .to_bytes();
        let err = Record::parse(&bytes[..HEADER_LEN + 3]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::IncompletePayload {
                declared: 6,
                available: 3
            }
        );
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(RecordFlags::EMPTY.to_string(), "-");
        assert_eq!(RecordFlags::DROPPED.to_string(), "DROPPED");
        assert_eq!(
            (RecordFlags::DROPPED | RecordFlags::TRUNCATED).to_string(),
            "DROPPED|TRUNCATED"
        );
        assert_eq!(RecordFlags::from_bits_retain(0x6).to_string(), "TRUNCATED|0x4");
    }
}

//! Consumer-side stream decoder.
//!
//! The control channel delivers records back to back, and a single read may
//! end in the middle of one. [`StreamDecoder`] buffers the tail of each read
//! until the rest arrives. A canary mismatch means the stream lost alignment;
//! the decoder then discards everything buffered so far and starts clean with
//! the next read.

use crate::error::DecodeError;
use crate::record::{Record, RecordHeader, HEADER_LEN};

/// Something the decoder found in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A complete, valid record.
    Record(Record),
    /// The batch was corrupt from `offset` on and `discarded` bytes were dropped.
    Corrupt {
        /// Offset of the bad header within the buffered bytes.
        offset: usize,
        /// Bytes thrown away.
        discarded: usize,
        /// What was wrong.
        error: DecodeError,
    },
}

/// Running totals kept by a [`StreamDecoder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Records decoded.
    pub records: u64,
    /// Records carrying the dropped-predecessor flag.
    pub gaps: u64,
    /// Corrupt batches discarded.
    pub corrupt_batches: u64,
    /// Bytes discarded because of corruption or end of stream.
    pub discarded_bytes: u64,
}

/// Incremental decoder for a record byte stream.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
    stats: DecoderStats,
}

impl StreamDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one read's worth of bytes and returns what could be decoded.
    ///
    /// A trailing partial record is kept for the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<DecodeEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut offset = 0;

        while self.pending.len() - offset >= HEADER_LEN {
            let rest = &self.pending[offset..];
            let header = match RecordHeader::parse(rest) {
                Ok(header) => header,
                Err(error) => {
                    let discarded = rest.len();
                    self.stats.corrupt_batches += 1;
                    self.stats.discarded_bytes += discarded as u64;
                    events.push(DecodeEvent::Corrupt {
                        offset,
                        discarded,
                        error,
                    });
                    offset = self.pending.len();
                    break;
                }
            };

            if header.record_len() > rest.len() {
                // wait for the rest of the payload
                break;
            }

            let payload = rest[HEADER_LEN..header.record_len()].to_vec();
            let record = Record { header, payload };
            self.stats.records += 1;
            if record.is_dropped_predecessor() {
                self.stats.gaps += 1;
            }
            events.push(DecodeEvent::Record(record));
            offset += header.record_len();
        }

        self.pending.drain(..offset);
        events
    }

    /// Decodes one self-contained batch, such as a datagram, discarding any
    /// incomplete trailing bytes instead of keeping them.
    pub fn push_batch(&mut self, bytes: &[u8]) -> Vec<DecodeEvent> {
        let events = self.push(bytes);
        self.finish();
        events
    }

    /// Ends the stream, discarding a partial record if one is buffered.
    ///
    /// Returns the number of bytes discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.pending.len();
        self.stats.discarded_bytes += discarded as u64;
        self.pending.clear();
        discarded
    }

    /// Bytes currently buffered waiting for the rest of a record.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns the running totals.
    #[must_use]
    pub const fn stats(&self) -> DecoderStats {
        self.stats
    }
}

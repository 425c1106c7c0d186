//! Frame reassembly: raw bytes in, records out.
//!
//! The reassembler owns the stream buffer, the text received so far that
//! has not yet been consumed as a record. Every chunk read from the device is
//! decoded as UTF-8 and appended at the tail; records are split off on the
//! record delimiter and into fields on the field delimiter.
//!
//! ## Emission
//!
//! With [`EmitPolicy::Delimited`] each terminated record is emitted once, if
//! it has at least `min_fields` fields, and removed from the buffer. With
//! [`EmitPolicy::Snapshot`] the buffer is left intact and, after every chunk,
//! the newest record (the unterminated tail, or if the buffer ends on a
//! delimiter the record that delimiter closed) is emitted whenever it has
//! enough fields. The same record can then be seen several times as fields
//! accumulate; consumers treat it as a running snapshot.
//!
//! ## Overflow
//!
//! The buffer is cleared outright once it holds more than `segment_cap`
//! segments, or grows past `max_buffer_len` bytes without a delimiter. The
//! empty segment after a trailing delimiter is counted, so with the default
//! cap of 10 the tenth delimiter clears a snapshot buffer.
//! Partial data is lost in both cases.
//!
//! ## Decoding
//!
//! A multi-byte character split across two chunks is carried over to the
//! next chunk. A chunk containing invalid UTF-8 is dropped whole; text already
//! in the buffer is never touched by a decode failure.

use bytes::{Buf, BytesMut};

use crate::{
    config::{EmitPolicy, ReassemblerConfig},
    error::{Error, Result},
    record::Record,
    tracing::prelude::*,
};

/// What a single [`FrameReassembler::push`] produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Pushed {
    pub records: Vec<Record>,
    /// Bytes discarded because they were not valid UTF-8.
    pub dropped: Option<usize>,
    /// The buffer was cleared by an overflow guard.
    pub reset: bool,
}

pub struct FrameReassembler {
    config: ReassemblerConfig,
    buffer: String,
    /// Undecoded bytes of a character that continues in the next chunk.
    pending: BytesMut,
}

impl FrameReassembler {
    pub fn new(config: ReassemblerConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            pending: BytesMut::with_capacity(4),
        }
    }

    pub fn config(&self) -> &ReassemblerConfig {
        &self.config
    }

    /// Bytes of decoded text waiting in the buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard all partial state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }

    /// Feed one chunk read from the device.
    pub fn push(&mut self, chunk: &[u8]) -> Pushed {
        let mut out = Pushed::default();
        if chunk.is_empty() {
            return out;
        }

        if let Err(e) = self.decode(chunk) {
            debug!(error = %e, "Dropping chunk");
            if let Error::Decode { dropped } = e {
                out.dropped = Some(dropped);
            }
            return out;
        }

        match self.config.emit {
            EmitPolicy::Delimited => self.drain_records(&mut out),
            EmitPolicy::Snapshot => self.snapshot(&mut out),
        }

        if self.buffer.len() > self.config.max_buffer_len {
            warn!(
                buffered = self.buffer.len(),
                limit = self.config.max_buffer_len,
                "No record delimiter seen, discarding buffer"
            );
            self.buffer.clear();
            out.reset = true;
        }

        out
    }

    /// Append the decodable part of `chunk` to the buffer. On invalid input
    /// the pending bytes are discarded and counted in [`Error::Decode`].
    fn decode(&mut self, chunk: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(chunk);

        let valid = match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.pending.clear();
                return Ok(());
            }
            // Truncated character at the end; keep it for the next chunk
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => {
                let dropped = self.pending.len();
                self.pending.clear();
                return Err(Error::Decode { dropped });
            }
        };

        if let Ok(text) = std::str::from_utf8(&self.pending[..valid]) {
            self.buffer.push_str(text);
        }
        self.pending.advance(valid);
        Ok(())
    }

    fn parse(&self, segment: &str) -> Option<Record> {
        if segment.is_empty() {
            return None;
        }
        let fields: Vec<&str> = segment.split(self.config.field_delimiter).collect();
        if fields.len() < self.config.min_fields {
            trace!(
                fields = fields.len(),
                min = self.config.min_fields,
                "Record below field threshold"
            );
            return None;
        }
        Some(fields.into_iter().collect())
    }

    fn drain_records(&mut self, out: &mut Pushed) {
        let delimiter = self.config.record_delimiter;
        let Some(end) = self.buffer.rfind(delimiter) else {
            return;
        };

        out.records = self.buffer[..end]
            .split(delimiter)
            .filter_map(|segment| self.parse(segment))
            .collect();
        self.buffer.drain(..end + delimiter.len_utf8());
    }

    fn snapshot(&mut self, out: &mut Pushed) {
        let delimiter = self.config.record_delimiter;
        let segments: Vec<&str> = self.buffer.split(delimiter).collect();
        // A trailing delimiter closes the newest record rather than opening
        // an empty one. The empty segment still counts toward the cap.
        let newest = match segments.as_slice() {
            [.., closed, ""] => Some(*closed),
            [.., last] => Some(*last),
            [] => None,
        };

        if let Some(record) = newest.and_then(|s| self.parse(s)) {
            out.records.push(record);
        }

        if segments.len() > self.config.segment_cap {
            debug!(segments = segments.len(), "Segment cap reached, clearing buffer");
            self.buffer.clear();
            out.reset = true;
        }
    }
}

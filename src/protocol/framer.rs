//! Line framing for the inbound byte stream.
//!
//! Serial reads return whatever happened to be in the UART buffer, so a single
//! response can arrive split across several chunks and several responses can
//! arrive in one chunk. [`FrameReassembler`] re-segments the stream on `\n`,
//! keeping the unterminated tail until the next chunk completes it.
//!
//! Lines longer than the limit are dropped whole, however they were chunked,
//! so a controller that never sends `\n` cannot grow the buffer without bound.

use bytes::{Buf, BytesMut};
use std::fmt;

/// Line terminator used in both directions.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Default longest accepted line, terminator excluded.
pub const MAX_LINE_LEN: usize = 1024;

/// One complete line from the device, terminator stripped and trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(String);

impl Frame {
    /// Build a frame from a raw line (without its terminator).
    pub fn from_line(line: &[u8]) -> Self {
        Frame(String::from_utf8_lossy(line).trim().to_string())
    }

    /// Frame text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the line was blank after trimming.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the frame, returning its text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulates raw chunks and yields completed frames in arrival order.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: BytesMut,
    // Bytes of `buffer` already known to hold no terminator.
    scanned: usize,
    max_line: usize,
    // Inside an oversized line; drop everything up to its terminator.
    discarding: bool,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_LEN)
    }
}

impl FrameReassembler {
    /// Empty reassembler with the default line limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty reassembler that drops lines longer than `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Append a chunk and return every frame it completes.
    ///
    /// Blank lines are returned as empty frames; discarding them is the
    /// dispatcher's job.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == LINE_TERMINATOR)
        {
            let line = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            if self.discarding {
                self.discarding = false;
            } else if line.len() > self.max_line {
                self.warn_oversized(line.len());
            } else {
                frames.push(Frame::from_line(&line));
            }
        }

        self.scanned = self.buffer.len();
        if self.buffer.len() > self.max_line {
            if !self.discarding {
                self.warn_oversized(self.buffer.len());
                self.discarding = true;
            }
            self.buffer.clear();
            self.scanned = 0;
        }
        frames
    }

    /// Number of bytes held back waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
    }

    fn warn_oversized(&self, bytes: usize) {
        tracing::warn!(bytes, max = self.max_line, "discarding over-long line");
    }
}

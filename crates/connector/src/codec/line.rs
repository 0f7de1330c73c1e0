//! Resumable CRLF line accumulator.
//!
//! Lines of the start line, the header section and the chunked framing may be split
//! across any number of socket reads. [`LineDecoder`] keeps the partial line (and a
//! pending carriage return) between calls and only yields once the CRLF is complete.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Decoder;

use crate::ensure;
use crate::protocol::ParseError;
use crate::protocol::header::{is_carriage_return, is_line_feed};

pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// Accumulates bytes until a CRLF and yields the line without it.
///
/// - a CR must be immediately followed by LF, anything else is a framing error
/// - a bare LF is dropped, it neither ends nor joins the line
#[derive(Debug)]
pub struct LineDecoder {
    line: BytesMut,
    pending_cr: bool,
    max_length: usize,
}

impl LineDecoder {
    pub fn new(max_length: usize) -> Self {
        Self { line: BytesMut::with_capacity(128), pending_cr: false, max_length }
    }

    /// Whether part of a line is waiting for more bytes.
    pub fn is_partial(&self) -> bool {
        self.pending_cr || !self.line.is_empty()
    }

    /// Drops any partial line, keeping the allocation.
    pub fn reset(&mut self) {
        self.line.clear();
        self.pending_cr = false;
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for LineDecoder {
    type Item = BytesMut;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while src.has_remaining() {
            let b = src.get_u8();

            if self.pending_cr {
                ensure!(is_line_feed(b), ParseError::MissingLineFeed { found: b });
                self.pending_cr = false;
                return Ok(Some(self.line.split()));
            }

            if is_carriage_return(b) {
                self.pending_cr = true;
            } else if !is_line_feed(b) {
                ensure!(self.line.len() < self.max_length, ParseError::too_large_line(self.max_length));
                self.line.put_u8(b);
            }
        }

        Ok(None)
    }
}

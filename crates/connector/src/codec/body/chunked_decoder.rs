//! Decoder for the chunked transfer coding.
//!
//! See [RFC 9112 Section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1). Size
//! lines, the CRLF closing each chunk and trailer lines all go through a [`LineDecoder`],
//! so they obey the same CRLF rules as the header section and may be split anywhere.

use std::cmp;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::LineDecoder;
use crate::ensure;
use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining: u64,
    line: LineDecoder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Reading `chunk-size [ chunk-ext ] CRLF`
    Size,
    /// Reading chunk data
    Data,
    /// Reading the CRLF after chunk data
    DataEnd,
    /// Reading trailer fields up to the empty line
    Trailer,
    /// Last chunk and trailers consumed
    End,
}

impl ChunkedDecoder {
    pub fn new(max_line_length: usize) -> Self {
        Self { state: ChunkedState::Size, remaining: 0, line: LineDecoder::new(max_line_length) }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ChunkedState::End
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    // extensions are ignored
    let size = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    ensure!(
        !size.is_empty() && size.iter().all(u8::is_ascii_hexdigit),
        ParseError::invalid_body(format!("invalid chunk size line {:?}", String::from_utf8_lossy(line)))
    );

    size.iter().try_fold(0u64, |acc, b| {
        let digit = u64::from(char::from(*b).to_digit(16).unwrap_or_default());
        acc.checked_mul(16).and_then(|acc| acc.checked_add(digit))
    })
    .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                ChunkedState::End => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }

                ChunkedState::Size => {
                    let Some(line) = self.line.decode(src)? else {
                        return Ok(None);
                    };
                    self.remaining = parse_chunk_size(&line)?;
                    self.state = if self.remaining == 0 { ChunkedState::Trailer } else { ChunkedState::Data };
                }

                ChunkedState::Data => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    let len = cmp::min(self.remaining, src.len() as u64);
                    #[allow(clippy::cast_possible_truncation, reason = "bounded by src.len()")]
                    let bytes = src.split_to(len as usize).freeze();
                    self.remaining -= len;
                    if self.remaining == 0 {
                        self.state = ChunkedState::DataEnd;
                    }

                    trace!(len = bytes.len(), "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                ChunkedState::DataEnd => {
                    let Some(line) = self.line.decode(src)? else {
                        return Ok(None);
                    };
                    ensure!(line.is_empty(), ParseError::invalid_body("chunk data longer than its size"));
                    self.state = ChunkedState::Size;
                }

                ChunkedState::Trailer => {
                    let Some(line) = self.line.decode(src)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = ChunkedState::End;
                    } else {
                        trace!(trailer = %String::from_utf8_lossy(&line), "ignore trailer field");
                    }
                }
            }
        }
    }
}

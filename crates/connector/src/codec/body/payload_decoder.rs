//! Decoder for message payloads, whatever their framing.
//!
//! The framing is chosen once the header section is complete (see
//! [`select_payload`](crate::protocol::header::select_payload)) and fixed for the rest of the
//! message.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

#[derive(Debug)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    /// Decode payload with a fixed content length
    Length(LengthDecoder),

    /// Decode payload using chunked transfer encoding
    Chunked(ChunkedDecoder),

    /// Everything up to the end of the stream
    UntilClose,

    /// Handle messages with no body
    NoBody,
}

impl PayloadDecoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked(max_line_length: usize) -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new(max_line_length)) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(size)) }
    }

    pub fn until_close() -> Self {
        Self { kind: Kind::UntilClose }
    }

    pub fn from_payload_size(payload_size: PayloadSize, max_line_length: usize) -> Self {
        match payload_size {
            PayloadSize::Length(n) => Self::fix_length(n),
            PayloadSize::Chunked => Self::chunked(max_line_length),
            PayloadSize::UntilClose => Self::until_close(),
            PayloadSize::Empty => Self::empty(),
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    pub fn is_until_close(&self) -> bool {
        matches!(self.kind, Kind::UntilClose)
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(length_decoder) => length_decoder.decode(src),
            Kind::Chunked(chunked_decoder) => chunked_decoder.decode(src),
            Kind::UntilClose if src.is_empty() => Ok(None),
            Kind::UntilClose => Ok(Some(PayloadItem::Chunk(src.split().freeze()))),
            Kind::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }

    /// Called once the peer closed its side: only a close delimited payload may end here.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::UntilClose if src.is_empty() => Ok(Some(PayloadItem::Eof)),
            Kind::UntilClose => Ok(Some(PayloadItem::Chunk(src.split().freeze()))),
            _ => match self.decode(src)? {
                Some(item) => Ok(Some(item)),
                None => Err(ParseError::UnexpectedEof),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DEFAULT_MAX_LINE_LENGTH;

    #[test]
    fn until_close_ends_with_the_stream() {
        let mut decoder = PayloadDecoder::from_payload_size(PayloadSize::UntilClose, DEFAULT_MAX_LINE_LENGTH);
        assert!(decoder.is_until_close());

        let mut buffer = BytesMut::from(&b"all of it"[..]);
        assert_eq!(&decoder.decode(&mut buffer).unwrap().unwrap().into_bytes().unwrap()[..], b"all of it");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
        assert!(decoder.decode_eof(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn truncated_payload() {
        let mut decoder = PayloadDecoder::from_payload_size(PayloadSize::Length(10), DEFAULT_MAX_LINE_LENGTH);
        let mut buffer = BytesMut::from(&b"short"[..]);
        assert!(decoder.decode_eof(&mut buffer).unwrap().unwrap().is_chunk());
        assert!(matches!(decoder.decode_eof(&mut buffer), Err(ParseError::UnexpectedEof)));

        let mut decoder = PayloadDecoder::from_payload_size(PayloadSize::Chunked, DEFAULT_MAX_LINE_LENGTH);
        assert!(decoder.is_chunked());
        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);
        assert!(decoder.decode_eof(&mut buffer).unwrap().unwrap().is_chunk());
        assert!(matches!(decoder.decode_eof(&mut buffer), Err(ParseError::UnexpectedEof)));
    }

    #[test]
    fn no_body() {
        let mut decoder = PayloadDecoder::from_payload_size(PayloadSize::Empty, DEFAULT_MAX_LINE_LENGTH);
        let mut buffer = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(buffer.len(), 16);
    }
}

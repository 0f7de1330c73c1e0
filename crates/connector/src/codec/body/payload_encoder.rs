use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

use crate::codec::body::chunked_encoder::ChunkedEncoder;
use crate::codec::body::length_encoder::LengthEncoder;
use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// Encodes an outbound entity with the framing announced in its header section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// content-length payload
    Length(LengthEncoder),

    /// transfer-encoding chunked payload
    Chunked(ChunkedEncoder),

    /// raw bytes, the end is signaled by closing the connection
    UntilClose,

    /// have no body with the message
    NoBody,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedEncoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthEncoder::new(size)) }
    }

    pub fn from_payload_size(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(n) => Self::fix_length(n),
            PayloadSize::Chunked => Self::chunked(),
            PayloadSize::UntilClose => Self { kind: Kind::UntilClose },
            PayloadSize::Empty => Self::empty(),
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    /// Framing overhead a single chunk may add, to keep room for it in the buffer.
    pub fn overhead(&self) -> usize {
        match self.kind {
            // hex size of a usize, CRLF after the size and after the data, last chunk
            Kind::Chunked(_) => 16 + 2 + 2 + 5,
            _ => 0,
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.kind {
            Kind::Length(encoder) => encoder.encode(item, dst),
            Kind::Chunked(encoder) => encoder.encode(item, dst),
            Kind::UntilClose => {
                if let PayloadItem::Chunk(bytes) = item {
                    dst.extend_from_slice(bytes.chunk());
                }
                Ok(())
            }
            Kind::NoBody => Ok(()),
        }
    }
}

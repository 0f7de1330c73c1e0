use bytes::{Buf, Bytes};

/// Represents an item in a message payload stream.
///
/// Produced by the payload decoders on the inbound side and consumed by the payload
/// encoders on the outbound side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    /// A chunk of payload data
    Chunk(Data),
    /// Marks the end of the payload stream
    Eof,
}

/// How the entity of a message is delimited on the wire.
///
/// Selected once the header section is complete:
/// - `Length`: exactly N bytes follow (`Content-Length`)
/// - `Chunked`: chunk-size lines delimit the data (`Transfer-Encoding: chunked`)
/// - `UntilClose`: everything up to the end of the stream (`Connection: close` without length)
/// - `Empty`: no entity at all
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    Length(u64),
    Chunked,
    UntilClose,
    Empty,
}

impl PayloadSize {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty | PayloadSize::Length(0))
    }

    #[inline]
    pub fn is_until_close(&self) -> bool {
        matches!(self, PayloadSize::UntilClose)
    }

    /// The exact size, when the framing announces it.
    pub fn exact(&self) -> Option<u64> {
        match self {
            PayloadSize::Length(n) => Some(*n),
            PayloadSize::Empty => Some(0),
            PayloadSize::Chunked | PayloadSize::UntilClose => None,
        }
    }
}

impl<D: Buf> PayloadItem<D> {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }
}

impl PayloadItem {
    /// Returns a reference to the contained bytes if this is a Chunk
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

use std::io::Write;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocol::{PayloadItem, SendError};

/// Frames each chunk as `size-in-hex CRLF data CRLF`, `Eof` writes the last chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false }
    }

    pub fn is_finished(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            // an empty chunk would read as the last one
            PayloadItem::Chunk(bytes) if !bytes.has_remaining() => Ok(()),
            PayloadItem::Chunk(bytes) => {
                write!(helper::Writer(dst), "{:X}\r\n", bytes.remaining())?;
                dst.reserve(bytes.remaining() + 2);
                dst.extend_from_slice(bytes.chunk());
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

mod helper {
    use bytes::{BufMut, BytesMut};
    use std::io;

    pub struct Writer<'a>(pub &'a mut BytesMut);

    impl io::Write for Writer<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.put_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn encode_chunks() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hello world, 26 bytes long")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();
        assert!(encoder.is_finished());
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"ignored")), &mut dst).unwrap();

        assert_eq!(&dst[..], b"1A\r\nhello world, 26 bytes long\r\n0\r\n\r\n");
    }
}

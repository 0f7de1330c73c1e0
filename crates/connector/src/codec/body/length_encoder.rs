use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

use crate::ensure;
use crate::protocol::{PayloadItem, SendError};

/// Copies exactly the announced number of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    length: u64,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }

    pub fn is_finished(&self) -> bool {
        self.length == 0
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(bytes) => {
                let len = bytes.remaining() as u64;
                ensure!(len <= self.length, SendError::invalid_body(format!("{} bytes more than announced", len - self.length)));
                dst.extend_from_slice(bytes.chunk());
                self.length -= len;
                Ok(())
            }
            PayloadItem::Eof => {
                ensure!(self.length == 0, SendError::invalid_body(format!("entity ended {} bytes short", self.length)));
                Ok(())
            }
        }
    }
}

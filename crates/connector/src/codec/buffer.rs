//! Fixed capacity byte buffer owned by one way.
//!
//! The buffer is allocated once with the connection and reused for every message: the
//! inbound way fills it from the socket and the decoders consume its front, the outbound
//! way encodes into it and drains it into the socket.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};

/// Outcome of one [`Buffer::fill`] attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fill {
    /// Some bytes were appended.
    Read(usize),
    /// The peer closed its side of the stream.
    Eof,
    /// No room left, the content must be consumed first.
    Full,
}

#[derive(Debug)]
pub struct Buffer {
    bytes: BytesMut,
    capacity: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { bytes: BytesMut::with_capacity(capacity), capacity }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Room left before the buffer is considered full.
    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.bytes.len())
    }

    #[inline]
    pub fn has_room(&self) -> bool {
        self.remaining_capacity() > 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The content, for decoders to consume from the front and encoders to append to.
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.bytes
    }

    /// Reads once from the source into the free room.
    ///
    /// `WouldBlock` and the other io errors are returned as is, the content is left intact.
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<Fill> {
        let start = self.bytes.len();
        let room = self.remaining_capacity();
        if room == 0 {
            return Ok(Fill::Full);
        }

        self.bytes.resize(start + room, 0);
        let result = reader.read(&mut self.bytes[start..]);
        let read = *result.as_ref().unwrap_or(&0);
        self.bytes.truncate(start + read);

        match result? {
            0 => Ok(Fill::Eof),
            n => Ok(Fill::Read(n)),
        }
    }

    /// Writes as much of the content as the sink accepts, returns the number of bytes written.
    ///
    /// Stops on `WouldBlock` without reporting it: the remaining bytes simply stay buffered.
    pub fn drain<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;
        while !self.bytes.is_empty() {
            match writer.write(&self.bytes) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.bytes.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

//! Wire level encoding and decoding.
//!
//! Everything here is synchronous and allocation conscious: the ways feed these codecs
//! with whatever the socket returned, and each codec keeps enough state to resume on the
//! next read. Codecs follow the [`tokio_util::codec`] convention, `Ok(None)` means more
//! bytes are needed and is never an error.
//!
//! - [`Buffer`]: the fixed capacity buffer of a way
//! - [`LineDecoder`]: the resumable CRLF line accumulator
//! - [`start_line`]: request line and status line parse/write strategies
//! - [`PayloadDecoder`] / [`PayloadEncoder`]: entity framing

mod body;
mod buffer;
mod line;
pub mod start_line;

pub use body::PayloadDecoder;
pub use body::PayloadEncoder;
pub use buffer::Buffer;
pub use buffer::Fill;
pub use line::DEFAULT_MAX_LINE_LENGTH;
pub use line::LineDecoder;

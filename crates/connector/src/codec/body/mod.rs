//! Entity body framing.
//!
//! Decoders turn wire bytes into [`PayloadItem`](crate::protocol::PayloadItem)s, encoders
//! do the opposite. Three disciplines are supported in both directions:
//!
//! - fixed length (`Content-Length`)
//! - chunked (`Transfer-Encoding: chunked`)
//! - close delimited (the entity ends with the stream)

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;

//! Protocol types shared by every layer of the connector.
//!
//! - [`message`]: payload items and entity framing ([`PayloadItem`], [`PayloadSize`])
//! - [`request`] / [`response`]: message heads built on the `http` crate
//! - [`entity`]: inbound and outbound entities ([`InboundEntity`], [`Entity`])
//! - [`header`]: header utilities used for framing decisions
//! - [`error`]: [`HttpError`] and its sources

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::Informational;
pub use response::ReasonPhrase;
pub use response::ResponseHead;
pub use response::continue_head;

mod error;
pub use error::ErrorKind;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

mod entity;
pub use entity::Entity;
pub use entity::InboundEntity;
pub use entity::Representation;
pub(crate) use entity::Chunk;
pub(crate) use entity::EntitySender;
pub(crate) use entity::Forwarded;
pub(crate) use entity::ReleaseHandle;

pub mod header;

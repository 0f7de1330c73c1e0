//! HTTP response header handling.
//!
//! A response head is `http::Response<()>`: the status line and header fields, with the
//! entity attached once known. Informational (1xx) heads received by a client are kept
//! apart from the final response in the [`Informational`] extension.

use http::{Response, StatusCode, Version};

/// Type alias for HTTP response headers.
pub type ResponseHead = Response<()>;

/// Interim responses received before the final one, attached to the final response's
/// extensions by the client inbound way.
#[derive(Debug, Default, Clone)]
pub struct Informational(pub Vec<(StatusCode, Option<String>)>);

/// Reason phrase sent by the peer, stored in the response extensions when it differs from
/// the canonical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

/// Builds the interim `100 Continue` head written ahead of a final response.
pub fn continue_head() -> ResponseHead {
    let mut head = Response::new(());
    *head.status_mut() = StatusCode::CONTINUE;
    *head.version_mut() = Version::HTTP_11;
    head
}

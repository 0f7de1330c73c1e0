//! HTTP request header handling.
//!
//! [`RequestHeader`] is the request while the inbound way is still reading its header
//! section: the start line is known, headers are appended one line at a time, and the
//! entity is attached once the framing has been selected.

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// Represents an HTTP request header.
///
/// Wraps a `http::Request<()>` so the body can be attached later with [`RequestHeader::body`].
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    /// Builds a header from the three parts of a request line, without any header field yet.
    pub fn new(method: Method, uri: Uri, version: Version) -> Self {
        let mut inner = Request::new(());
        *inner.method_mut() = method;
        *inner.uri_mut() = uri;
        *inner.version_mut() = version;
        Self { inner }
    }

    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body to this header, converting it into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn build_then_attach_body() {
        let mut header = RequestHeader::new(Method::POST, Uri::from_static("/upload?id=3"), Version::HTTP_10);
        header.headers_mut().append(http::header::HOST, HeaderValue::from_static("h"));

        assert_eq!(header.method(), &Method::POST);
        assert_eq!(header.uri().path(), "/upload");
        assert_eq!(header.uri().query(), Some("id=3"));
        assert_eq!(header.version(), Version::HTTP_10);

        let request = header.body("payload");
        assert_eq!(request.headers().get(http::header::HOST).unwrap(), "h");
        assert_eq!(*request.body(), "payload");
    }
}

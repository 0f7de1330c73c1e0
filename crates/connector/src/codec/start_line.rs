//! Start line strategies.
//!
//! Servers read request lines and write status lines, clients do the opposite. The way
//! selects the pair of functions from its role instead of specializing itself.

use bytes::{BufMut, BytesMut};
use http::{Method, StatusCode, Uri, Version};

use crate::ensure;
use crate::protocol::{ParseError, RequestHeader};

/// A parsed status line, the reason phrase is kept as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: Version,
    pub status: StatusCode,
    pub reason: Option<String>,
}

impl StatusLine {
    /// The reason phrase when it differs from the canonical one for the status.
    pub fn custom_reason(&self) -> Option<&str> {
        self.reason.as_deref().filter(|reason| Some(*reason) != self.status.canonical_reason())
    }
}

fn parse_version(bytes: &[u8]) -> Result<Version, ParseError> {
    match bytes {
        b"HTTP/1.1" => Ok(Version::HTTP_11),
        b"HTTP/1.0" => Ok(Version::HTTP_10),
        _ => Err(ParseError::invalid_version(String::from_utf8_lossy(bytes))),
    }
}

fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_10 { "HTTP/1.0" } else { "HTTP/1.1" }
}

/// Parses `METHOD SP request-target SP HTTP-version`.
///
/// The line is split on the first two spaces, an empty target becomes `/`.
pub fn parse_request_line(line: &[u8]) -> Result<RequestHeader, ParseError> {
    let mut parts = line.splitn(3, |b| *b == b' ');
    let method = parts.next().unwrap_or_default();
    let (Some(uri), Some(version)) = (parts.next(), parts.next()) else {
        return Err(ParseError::invalid_start_line(format!("missing space in {:?}", String::from_utf8_lossy(line))));
    };

    ensure!(!method.is_empty(), ParseError::invalid_start_line("empty method"));
    let method = Method::from_bytes(method).map_err(ParseError::invalid_start_line)?;
    let uri = if uri.is_empty() { Uri::from_static("/") } else { Uri::try_from(uri).map_err(ParseError::invalid_start_line)? };
    let version = parse_version(version)?;

    Ok(RequestHeader::new(method, uri, version))
}

/// Parses `HTTP-version SP status-code [SP reason-phrase]`.
pub fn parse_status_line(line: &[u8]) -> Result<StatusLine, ParseError> {
    let mut parts = line.splitn(3, |b| *b == b' ');
    let version = parts.next().unwrap_or_default();
    let Some(code) = parts.next() else {
        return Err(ParseError::invalid_start_line(format!("missing status in {:?}", String::from_utf8_lossy(line))));
    };

    let version = parse_version(version)?;
    ensure!(code.len() == 3 && code.iter().all(u8::is_ascii_digit), ParseError::invalid_status(String::from_utf8_lossy(code)));
    let status = StatusCode::from_bytes(code).map_err(|_e| ParseError::invalid_status(String::from_utf8_lossy(code)))?;

    let reason = parts.next().map(|reason| String::from_utf8_lossy(reason).trim().to_owned()).filter(|reason| !reason.is_empty());

    Ok(StatusLine { version, status, reason })
}

/// Writes the request line in origin form.
pub fn write_request_line(method: &Method, uri: &Uri, version: Version, dst: &mut BytesMut) {
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    dst.reserve(method.as_str().len() + target.len() + 12);
    dst.put_slice(method.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target.as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(version_str(version).as_bytes());
    dst.put_slice(b"\r\n");
}

/// Writes the status line, using the canonical reason phrase unless one is given.
pub fn write_status_line(version: Version, status: StatusCode, reason: Option<&str>, dst: &mut BytesMut) {
    let reason = reason.or_else(|| status.canonical_reason()).unwrap_or("");
    dst.reserve(reason.len() + 16);
    dst.put_slice(version_str(version).as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(status.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(reason.as_bytes());
    dst.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line() {
        let header = parse_request_line(b"GET /foo?x=1 HTTP/1.1").unwrap();
        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.uri(), "/foo?x=1");
        assert_eq!(header.version(), Version::HTTP_11);

        let header = parse_request_line(b"OPTIONS  HTTP/1.0").unwrap();
        assert_eq!(header.method(), &Method::OPTIONS);
        assert_eq!(header.uri(), "/");
        assert_eq!(header.version(), Version::HTTP_10);
    }

    #[test]
    fn bad_request_lines() {
        assert!(matches!(parse_request_line(b"GET"), Err(ParseError::InvalidStartLine { .. })));
        assert!(matches!(parse_request_line(b"GET /"), Err(ParseError::InvalidStartLine { .. })));
        assert!(matches!(parse_request_line(b" / HTTP/1.1"), Err(ParseError::InvalidStartLine { .. })));
        assert!(matches!(parse_request_line(b"GET / HTTP/2.0"), Err(ParseError::InvalidVersion { .. })));
        assert!(matches!(parse_request_line(b"G\"T / HTTP/1.1"), Err(ParseError::InvalidStartLine { .. })));
    }

    #[test]
    fn status_line() {
        let line = parse_status_line(b"HTTP/1.1 204 No Content").unwrap();
        assert_eq!(line.version, Version::HTTP_11);
        assert_eq!(line.status, StatusCode::NO_CONTENT);
        assert_eq!(line.reason.as_deref(), Some("No Content"));
        assert_eq!(line.custom_reason(), None);

        let line = parse_status_line(b"HTTP/1.0 200 Fine And Dandy").unwrap();
        assert_eq!(line.custom_reason(), Some("Fine And Dandy"));

        let line = parse_status_line(b"HTTP/1.1 100").unwrap();
        assert_eq!(line.status, StatusCode::CONTINUE);
        assert_eq!(line.reason, None);
    }

    #[test]
    fn bad_status_lines() {
        assert!(matches!(parse_status_line(b"HTTP/1.1"), Err(ParseError::InvalidStartLine { .. })));
        assert!(matches!(parse_status_line(b"HTTP/1.1 2x4 Oops"), Err(ParseError::InvalidStatus { .. })));
        assert!(matches!(parse_status_line(b"HTTP/1.1 20 Short"), Err(ParseError::InvalidStatus { .. })));
        assert!(matches!(parse_status_line(b"SPDY/3 200 OK"), Err(ParseError::InvalidVersion { .. })));
    }

    #[test]
    fn write_lines() {
        let mut dst = BytesMut::new();
        write_request_line(&Method::POST, &Uri::from_static("http://h:8080/a/b?c=d"), Version::HTTP_11, &mut dst);
        assert_eq!(&dst[..], b"POST /a/b?c=d HTTP/1.1\r\n");

        let mut dst = BytesMut::new();
        write_status_line(Version::HTTP_11, StatusCode::NOT_FOUND, None, &mut dst);
        assert_eq!(&dst[..], b"HTTP/1.1 404 Not Found\r\n");

        let mut dst = BytesMut::new();
        write_status_line(Version::HTTP_11, StatusCode::NOT_FOUND, Some("Nope"), &mut dst);
        assert_eq!(&dst[..], b"HTTP/1.1 404 Nope\r\n");
    }
}

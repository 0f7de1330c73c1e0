//! Header utilities shared by the inbound and outbound ways.
//!
//! Byte classification for the line parser, extraction of the framing related headers
//! (`Content-Length`, `Transfer-Encoding`, `Connection`) and header line (de)serialization.

use bytes::{BufMut, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, EXPECT, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Version};

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize};

#[inline]
pub fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

#[inline]
pub fn is_carriage_return(b: u8) -> bool {
    b == b'\r'
}

#[inline]
pub fn is_line_feed(b: u8) -> bool {
    b == b'\n'
}

/// Parses a complete header line (CRLF already stripped) into a name/value pair.
///
/// Optional whitespace around the value is trimmed.
pub fn parse_header_line(line: &[u8]) -> Result<(HeaderName, HeaderValue), ParseError> {
    let colon = line
        .iter()
        .position(|b| *b == b':')
        .ok_or_else(|| ParseError::invalid_header(format!("missing colon in {:?}", String::from_utf8_lossy(line))))?;

    let (name, value) = (&line[..colon], &line[colon + 1..]);
    ensure!(!name.is_empty(), ParseError::invalid_header("empty header name"));
    // no whitespace allowed between the field name and the colon
    ensure!(!name.last().copied().is_some_and(is_space), ParseError::invalid_header("whitespace before colon"));

    let name = HeaderName::from_bytes(name).map_err(ParseError::invalid_header)?;
    let value = HeaderValue::from_bytes(value.trim_ascii()).map_err(ParseError::invalid_header)?;
    Ok((name, value))
}

/// Appends `name: value\r\n` to the destination buffer.
pub fn write_header_line(name: &HeaderName, value: &HeaderValue, dst: &mut BytesMut) {
    dst.reserve(name.as_str().len() + value.len() + 4);
    dst.put_slice(name.as_ref());
    dst.put_slice(b": ");
    dst.put_slice(value.as_bytes());
    dst.put_slice(b"\r\n");
}

/// Length in bytes of the serialized header line.
#[inline]
pub fn header_line_len(name: &HeaderName, value: &HeaderValue) -> usize {
    name.as_str().len() + value.len() + 4
}

/// Returns the `Content-Length` value, `None` when absent.
///
/// Several values are accepted only when they all agree.
pub fn content_length(headers: &HeaderMap) -> Result<Option<u64>, ParseError> {
    let mut result = None;

    for value in headers.get_all(CONTENT_LENGTH) {
        let str = value.to_str().map_err(|_e| ParseError::invalid_content_length("value can't to_str"))?;
        for item in str.split(',') {
            let length =
                item.trim().parse::<u64>().map_err(|_e| ParseError::invalid_content_length(format!("value {str} is not u64")))?;
            match result {
                Some(previous) if previous != length => {
                    return Err(ParseError::invalid_content_length(format!("conflicting values {previous} and {length}")));
                }
                _ => result = Some(length),
            }
        }
    }

    Ok(result)
}

/// Checks if `chunked` is the final transfer coding.
pub fn is_chunked_encoding(headers: &HeaderMap) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .last()
        .and_then(|value| value.as_bytes().rsplit(|b| *b == b',').next())
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(CHUNKED))
}

fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

pub fn is_connection_close(headers: &HeaderMap) -> bool {
    has_connection_token(headers, "close")
}

pub fn is_keep_alive(headers: &HeaderMap) -> bool {
    has_connection_token(headers, "keep-alive")
}

/// Whether the message allows the connection to stay open after it.
pub fn is_persistent(version: Version, headers: &HeaderMap) -> bool {
    match version {
        Version::HTTP_11 => !is_connection_close(headers),
        Version::HTTP_10 => is_keep_alive(headers) && !is_connection_close(headers),
        _ => false,
    }
}

pub fn expects_continue(headers: &HeaderMap) -> bool {
    headers.get(EXPECT).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
}

/// Selects the entity framing from the header section.
///
/// Chunked encoding wins, then a non zero `Content-Length`, then `Connection: close`
/// (an entity delimited by the end of the stream). Anything else means no entity.
pub fn select_payload(headers: &HeaderMap) -> Result<PayloadSize, ParseError> {
    let chunked = is_chunked_encoding(headers);
    let length = content_length(headers)?;

    // refer: https://www.rfc-editor.org/rfc/rfc9112.html#name-transfer-encoding
    ensure!(
        !(chunked && length.is_some()),
        ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")
    );

    let payload_size = match length {
        _ if chunked => PayloadSize::Chunked,
        Some(0) => PayloadSize::Empty,
        Some(n) => PayloadSize::Length(n),
        None if is_connection_close(headers) => PayloadSize::UntilClose,
        None => PayloadSize::Empty,
    };
    Ok(payload_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn check_is_chunked() {
        assert!(!is_chunked_encoding(&HeaderMap::new()));
        assert!(is_chunked_encoding(&headers(&[("Transfer-Encoding", "gzip, chunked")])));
        assert!(is_chunked_encoding(&headers(&[("Transfer-Encoding", "Chunked")])));
        assert!(!is_chunked_encoding(&headers(&[("Transfer-Encoding", "chunked, gzip")])));
        assert!(!is_chunked_encoding(&headers(&[("Transfer-Encoding", "gzip")])));
    }

    #[test]
    fn parse_simple_header_line() {
        let (name, value) = parse_header_line(b"Host: 127.0.0.1:8080").unwrap();
        assert_eq!(name, http::header::HOST);
        assert_eq!(value, "127.0.0.1:8080");

        let (name, value) = parse_header_line(b"X-Empty:").unwrap();
        assert_eq!(name.as_str(), "x-empty");
        assert_eq!(value, "");

        let (_, value) = parse_header_line(b"Accept: \t text/html  ").unwrap();
        assert_eq!(value, "text/html");
    }

    #[test]
    fn reject_malformed_header_line() {
        assert!(parse_header_line(b"no colon here").is_err());
        assert!(parse_header_line(b": value").is_err());
        assert!(parse_header_line(b"Host : value").is_err());
        assert!(parse_header_line(b"Bad Name: value").is_err());
    }

    #[test]
    fn write_line_round() {
        let mut dst = BytesMut::new();
        write_header_line(&http::header::CONTENT_TYPE, &HeaderValue::from_static("text/plain"), &mut dst);
        assert_eq!(&dst[..], b"content-type: text/plain\r\n");
        assert_eq!(header_line_len(&http::header::CONTENT_TYPE, &HeaderValue::from_static("text/plain")), dst.len());
    }

    #[test]
    fn content_length_values() {
        assert_eq!(content_length(&HeaderMap::new()).unwrap(), None);
        assert_eq!(content_length(&headers(&[("Content-Length", "42")])).unwrap(), Some(42));
        assert_eq!(content_length(&headers(&[("Content-Length", "42, 42")])).unwrap(), Some(42));
        assert!(content_length(&headers(&[("Content-Length", "42"), ("Content-Length", "7")])).is_err());
        assert!(content_length(&headers(&[("Content-Length", "abc")])).is_err());
    }

    #[test]
    fn connection_tokens() {
        assert!(is_connection_close(&headers(&[("Connection", "Close")])));
        assert!(is_connection_close(&headers(&[("Connection", "TE, close")])));
        assert!(!is_connection_close(&headers(&[("Connection", "keep-alive")])));

        assert!(is_persistent(Version::HTTP_11, &HeaderMap::new()));
        assert!(!is_persistent(Version::HTTP_11, &headers(&[("Connection", "close")])));
        assert!(!is_persistent(Version::HTTP_10, &HeaderMap::new()));
        assert!(is_persistent(Version::HTTP_10, &headers(&[("Connection", "Keep-Alive")])));
    }

    #[test]
    fn payload_selection() {
        assert_eq!(select_payload(&headers(&[("Content-Length", "12")])).unwrap(), PayloadSize::Length(12));
        assert_eq!(select_payload(&headers(&[("Transfer-Encoding", "chunked")])).unwrap(), PayloadSize::Chunked);
        assert_eq!(select_payload(&headers(&[("Connection", "close")])).unwrap(), PayloadSize::UntilClose);
        assert_eq!(select_payload(&headers(&[("Content-Length", "0"), ("Connection", "close")])).unwrap(), PayloadSize::Empty);
        assert_eq!(select_payload(&headers(&[("Host", "h")])).unwrap(), PayloadSize::Empty);
        assert!(select_payload(&headers(&[("Transfer-Encoding", "chunked"), ("Content-Length", "3")])).is_err());
    }
}

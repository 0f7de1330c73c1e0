//! Blocking HTTP helpers used to talk to the connector over loopback sockets.

#![allow(dead_code, reason = "each test binary uses its own subset of the helpers")]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Turns an `indoc!` fixture into wire format.
pub fn crlf(text: &str) -> Vec<u8> {
    text.replace('\n', "\r\n").into_bytes()
}

/// A message as read from the wire, header names lower cased.
#[derive(Debug)]
pub struct RawMessage {
    pub start_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// The status code of a response.
    pub fn status(&self) -> u16 {
        self.start_line.split(' ').nth(1).and_then(|code| code.parse().ok()).unwrap_or_default()
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }
}

/// A blocking peer wrapping one socket.
pub struct Peer {
    reader: BufReader<TcpStream>,
}

impl Peer {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        Self { reader: BufReader::new(stream) }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.reader.get_ref().local_addr().unwrap()
    }

    pub fn send(&mut self, bytes: &[u8]) {
        self.reader.get_mut().write_all(bytes).unwrap();
    }

    fn line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }

    fn head(&mut self) -> io::Result<(String, Vec<(String, String)>)> {
        let start_line = self.line()?;
        let mut headers = vec![];
        loop {
            let line = self.line()?;
            if line.is_empty() {
                return Ok((start_line, headers));
            }
            let (name, value) = line.split_once(':').ok_or(io::ErrorKind::InvalidData)?;
            headers.push((name.to_ascii_lowercase(), value.trim().to_owned()));
        }
    }

    fn chunked_body(&mut self) -> io::Result<Vec<u8>> {
        let mut body = vec![];
        loop {
            let size = usize::from_str_radix(&self.line()?, 16).map_err(|_e| io::ErrorKind::InvalidData)?;
            if size == 0 {
                self.line()?;
                return Ok(body);
            }
            let start = body.len();
            body.resize(start + size, 0);
            self.reader.read_exact(&mut body[start..])?;
            self.line()?;
        }
    }

    fn read_message(&mut self) -> io::Result<RawMessage> {
        let (start_line, headers) = self.head()?;
        let mut message = RawMessage { start_line, headers, body: vec![] };

        if message.header("transfer-encoding").is_some_and(|te| te.eq_ignore_ascii_case("chunked")) {
            message.body = self.chunked_body()?;
        } else if let Some(length) = message.header("content-length") {
            let length = length.parse().map_err(|_e| io::ErrorKind::InvalidData)?;
            message.body = vec![0; length];
            self.reader.read_exact(&mut message.body)?;
        }
        Ok(message)
    }

    /// Reads a response, close delimited entities are read up to the end of the stream.
    pub fn try_read_response(&mut self) -> io::Result<RawMessage> {
        let (start_line, headers) = self.head()?;
        let mut response = RawMessage { start_line, headers, body: vec![] };
        let status = response.status();

        if (100..200).contains(&status) || status == 204 || status == 304 {
            return Ok(response);
        }
        if response.header("transfer-encoding").is_some_and(|te| te.eq_ignore_ascii_case("chunked")) {
            response.body = self.chunked_body()?;
        } else if let Some(length) = response.header("content-length") {
            let length = length.parse().map_err(|_e| io::ErrorKind::InvalidData)?;
            response.body = vec![0; length];
            self.reader.read_exact(&mut response.body)?;
        } else {
            self.reader.read_to_end(&mut response.body)?;
        }
        Ok(response)
    }

    pub fn read_response(&mut self) -> RawMessage {
        self.try_read_response().unwrap()
    }

    /// Reads a request, requests without framing headers have no entity.
    pub fn read_request(&mut self) -> io::Result<RawMessage> {
        self.read_message()
    }

    /// Whether the other end closed the connection without sending anything more.
    pub fn is_closed_by_peer(&mut self) -> bool {
        let mut rest = vec![];
        match self.reader.read_to_end(&mut rest) {
            Ok(_) => rest.is_empty(),
            Err(e) => e.kind() == io::ErrorKind::ConnectionReset,
        }
    }
}

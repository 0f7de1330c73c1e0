use std::io;
use thiserror::Error;

/// Classification of a connector failure.
///
/// "Need more data" is not an error at all: decoders return `Ok(None)` for it, the same way
/// [`tokio_util::codec::Decoder`] does.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer sent bytes that can't be framed as HTTP, the connection is sacrificed.
    Framing,
    /// The socket itself failed (reset, broken pipe, refused connection...).
    Transport,
    /// The request could not be assigned to any connection.
    Unavailable,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("framing error: {source}")]
    Framing {
        #[from]
        source: ParseError,
    },

    #[error("sending error: {source}")]
    Send {
        #[from]
        source: SendError,
    },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: io::Error,
    },

    #[error("no connection available: {reason}")]
    Unavailable { reason: String },

    #[error("connection closed before the message completed")]
    Closed,
}

impl HttpError {
    pub fn unavailable<S: ToString>(str: S) -> Self {
        Self::Unavailable { reason: str.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::Framing { source: ParseError::Io { .. } } => ErrorKind::Transport,
            HttpError::Framing { .. } => ErrorKind::Framing,
            HttpError::Send { .. } | HttpError::Transport { .. } | HttpError::Closed => ErrorKind::Transport,
            HttpError::Unavailable { .. } => ErrorKind::Unavailable,
        }
    }

    pub fn is_framing(&self) -> bool {
        self.kind() == ErrorKind::Framing
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("missing line feed after carriage return, found byte {found:#04x} instead")]
    MissingLineFeed { found: u8 },

    #[error("line length exceed the limit {max_size}")]
    TooLargeLine { max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid start line: {reason}")]
    InvalidStartLine { reason: String },

    #[error("invalid status code: {code:?}")]
    InvalidStatus { code: String },

    #[error("invalid http version: {version:?}")]
    InvalidVersion { version: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("connection closed before the end of the message")]
    UnexpectedEof,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_line(max_size: usize) -> Self {
        Self::TooLargeLine { max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_start_line<S: ToString>(str: S) -> Self {
        Self::InvalidStartLine { reason: str.to_string() }
    }

    pub fn invalid_status<S: ToString>(str: S) -> Self {
        Self::InvalidStatus { code: str.to_string() }
    }

    pub fn invalid_version<S: ToString>(str: S) -> Self {
        Self::InvalidVersion { version: str.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("unsupported message: {reason}")]
    Unsupported { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn unsupported<S: ToString>(str: S) -> Self {
        Self::Unsupported { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

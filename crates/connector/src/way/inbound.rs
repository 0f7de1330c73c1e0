//! The reading half of a connection.
//!
//! Bytes are read from the socket into the way's buffer and consumed by the line decoder
//! (start line and header section) then by the payload decoder (entity). Every decoder
//! keeps its own state, so a message may arrive in any number of reads of any size.
//!
//! Once a message is complete the way stays at [`MessageState::End`] until its entity has
//! been released and the connection allows the next message to be read.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::channel::oneshot;
use http::header::Entry;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Version};
use mio::Waker;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::codec::start_line::{self, StatusLine};
use crate::codec::{Buffer, Fill, LineDecoder, PayloadDecoder};
use crate::config::ConnectorConfig;
use crate::ensure;
use crate::protocol::header::{self, is_space};
use crate::protocol::{
    EntitySender, Forwarded, HttpError, InboundEntity, Informational, ParseError, PayloadItem, PayloadSize,
    ReasonPhrase, ReleaseHandle, RequestHeader, ResponseHead,
};
use crate::way::{Direction, IoState, MessageState, Role, echo};

/// A client call waiting for its response.
#[derive(Debug)]
pub(crate) struct PendingCall {
    /// Responses to `HEAD` never carry an entity.
    pub(crate) head: bool,
    pub(crate) responder: oneshot::Sender<Result<Response<InboundEntity>, HttpError>>,
}

impl PendingCall {
    pub(crate) fn fail(self, error: HttpError) {
        // the caller may have given up already
        let _ = self.responder.send(Err(error));
    }
}

/// What the connection learns from the inbound way.
#[derive(Debug)]
pub(crate) enum InboundEvent {
    /// Server: the header section of request `seq` is complete, a response slot is needed.
    Head { seq: u64, head_request: bool, version: Version, persistent: bool, expect_continue: bool },
    /// Server: request `seq` is ready for the handler.
    Request { seq: u64, request: Request<InboundEntity> },
    /// A message has been read completely.
    Completed { persistent: bool },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// The socket has nothing more for now.
    WouldBlock,
    /// The way stopped reading, the socket may still hold bytes.
    Paused,
    /// The peer closed its side.
    Eof,
}

#[derive(Debug)]
enum Head {
    Request(RequestHeader),
    Response(ResponseHead),
}

impl Head {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        match self {
            Head::Request(header) => header.headers_mut(),
            Head::Response(head) => head.headers_mut(),
        }
    }
}

#[derive(Debug)]
pub struct InboundWay {
    role: Role,
    buffer: Buffer,
    line: LineDecoder,
    io_state: IoState,
    message_state: MessageState,
    max_header_count: usize,
    max_line_length: usize,
    tracing: bool,
    /// Hand requests over as soon as their header section is read, entity still streaming.
    emit_at_headers: bool,

    head: Option<Head>,
    header_count: usize,
    last_header: Option<HeaderName>,
    decoder: Option<PayloadDecoder>,
    sender: Option<EntitySender>,
    /// An item the entity consumer had no room for, reading waits until it is taken.
    stash: Option<PayloadItem>,
    /// The peer closed while the way was paused.
    eof: bool,
    deferred: Option<(u64, Request<InboundEntity>)>,
    persistent: bool,
    next_seq: u64,

    /// Set while an entity handed out by this way is not released.
    busy: Arc<AtomicBool>,
    waker: Option<Arc<Waker>>,

    pending: VecDeque<PendingCall>,
    informational: Vec<(StatusCode, Option<String>)>,
}

impl InboundWay {
    pub(crate) fn new(role: Role, config: &ConnectorConfig, waker: Option<Arc<Waker>>) -> Self {
        Self {
            role,
            buffer: Buffer::with_capacity(config.inbound_buffer_size()),
            line: LineDecoder::new(config.max_line_length()),
            io_state: IoState::Idle,
            message_state: MessageState::None,
            max_header_count: config.max_header_count(),
            max_line_length: config.max_line_length(),
            tracing: config.tracing(),
            emit_at_headers: role == Role::Client || config.worker_threads(),
            head: None,
            header_count: 0,
            last_header: None,
            decoder: None,
            sender: None,
            stash: None,
            eof: false,
            deferred: None,
            persistent: true,
            next_seq: 0,
            busy: Arc::new(AtomicBool::new(false)),
            waker,
            pending: VecDeque::new(),
            informational: Vec::new(),
        }
    }

    pub fn io_state(&self) -> IoState {
        self.io_state
    }

    pub fn message_state(&self) -> MessageState {
        self.message_state
    }

    /// Whether an entity handed out by this way is still held by its consumer.
    pub fn is_entity_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub(crate) fn has_buffered_bytes(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Whether bytes already read still have to reach their consumer.
    pub(crate) fn has_unread_input(&self) -> bool {
        !self.buffer.is_empty() || self.stash.is_some()
    }

    pub(crate) fn has_pending_calls(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Whether a message is partially read, not released, or awaited.
    pub fn is_busy(&self) -> bool {
        let reading = match self.message_state {
            MessageState::None | MessageState::End => false,
            MessageState::StartLine => self.line.is_partial(),
            MessageState::Headers | MessageState::Body => true,
        };
        reading || self.is_entity_busy() || self.stash.is_some() || self.deferred.is_some() || !self.pending.is_empty()
    }

    /// Number of messages in progress, used to balance client connections.
    pub fn load_score(&self) -> usize {
        let current = usize::from(matches!(self.message_state, MessageState::Headers | MessageState::Body));
        current + self.pending.len()
    }

    /// Starts waiting for a start line.
    pub(crate) fn arm(&mut self) {
        self.message_state = MessageState::StartLine;
        self.io_state = IoState::ReadInterest;
    }

    /// Moves on to the next message once the previous one is released and `allowed`.
    pub(crate) fn try_rearm(&mut self, allowed: bool) -> bool {
        if self.message_state == MessageState::End && allowed && !self.is_entity_busy() && self.stash.is_none() {
            trace!(role = ?self.role, "inbound way re-armed");
            self.arm();
            return true;
        }
        false
    }

    /// Stops reading, the current message (if any) is left as is.
    pub(crate) fn pause(&mut self) {
        self.io_state = IoState::Idle;
    }

    /// Hands the held back item over once the entity consumer caught up, then reading
    /// goes on where it stopped.
    pub(crate) fn resume(&mut self, events: &mut Vec<InboundEvent>) -> Result<bool, HttpError> {
        let Some(item) = self.stash.take() else {
            return Ok(false);
        };
        let eof = item.is_eof();
        if !self.forward(item) {
            return Ok(false);
        }

        trace!(role = ?self.role, "entity consumer caught up, inbound way resumed");
        if eof {
            self.sender = None;
        } else if self.eof {
            self.on_eof(events)?;
        } else {
            self.io_state = IoState::ReadInterest;
        }
        Ok(true)
    }

    /// Client: a request has started, its response comes next in line.
    pub(crate) fn expect(&mut self, call: PendingCall) {
        self.pending.push_back(call);
    }

    /// Reads from the source until it would block, the way pauses, or the stream ends.
    pub(crate) fn read_from<R: Read>(&mut self, reader: &mut R, events: &mut Vec<InboundEvent>) -> Result<ReadOutcome, HttpError> {
        loop {
            self.process(events)?;
            if self.io_state != IoState::ReadInterest {
                return Ok(ReadOutcome::Paused);
            }

            let before = self.buffer.len();
            match self.buffer.fill(reader) {
                Ok(Fill::Read(n)) => {
                    trace!(direction = ?Direction::Inbound, bytes = n, "read from socket");
                    if self.tracing {
                        echo(Direction::Inbound, &self.buffer.bytes()[before..]);
                    }
                }
                Ok(Fill::Full) => return Ok(ReadOutcome::Paused),
                Ok(Fill::Eof) => {
                    self.on_eof(events)?;
                    return Ok(ReadOutcome::Eof);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Consumes the buffered bytes as far as the current state allows.
    pub(crate) fn process(&mut self, events: &mut Vec<InboundEvent>) -> Result<(), HttpError> {
        loop {
            match self.message_state {
                MessageState::None | MessageState::End => return Ok(()),

                MessageState::StartLine => {
                    if self.io_state != IoState::ReadInterest {
                        return Ok(());
                    }
                    let Some(line) = self.line.decode(self.buffer.bytes_mut())? else {
                        return Ok(());
                    };
                    // robustness: empty lines ahead of a start line are ignored
                    if line.is_empty() {
                        continue;
                    }
                    self.on_start_line(&line)?;
                }

                MessageState::Headers => {
                    let Some(line) = self.line.decode(self.buffer.bytes_mut())? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        self.on_headers_complete(events)?;
                    } else {
                        self.on_header_line(&line)?;
                    }
                }

                MessageState::Body => {
                    if self.stash.is_some() {
                        return Ok(());
                    }
                    let Some(decoder) = self.decoder.as_mut() else {
                        return Err(ParseError::invalid_body("no payload decoder").into());
                    };
                    match decoder.decode(self.buffer.bytes_mut())? {
                        None => return Ok(()),
                        Some(PayloadItem::Chunk(bytes)) => {
                            if !self.forward(PayloadItem::Chunk(bytes)) {
                                return Ok(());
                            }
                        }
                        Some(PayloadItem::Eof) => self.on_body_complete(events),
                    }
                }
            }
        }
    }

    fn on_start_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let head = match self.role {
            Role::Server => Head::Request(start_line::parse_request_line(line)?),
            Role::Client => {
                ensure!(!self.pending.is_empty(), ParseError::invalid_start_line("response without pending request"));
                Head::Response(response_head(start_line::parse_status_line(line)?))
            }
        };

        trace!(role = ?self.role, start_line = %String::from_utf8_lossy(line), "start line read");
        self.head = Some(head);
        self.header_count = 0;
        self.last_header = None;
        self.message_state = MessageState::Headers;
        Ok(())
    }

    fn on_header_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let Some(head) = self.head.as_mut() else {
            return Err(ParseError::invalid_header("header line without start line"));
        };

        // obsolete line folding: the line continues the previous field value
        if line.first().copied().is_some_and(is_space) {
            let Some(name) = self.last_header.clone() else {
                return Err(ParseError::invalid_header("continuation line without field"));
            };
            if let Entry::Occupied(mut entry) = head.headers_mut().entry(name) {
                if let Some(value) = entry.iter_mut().last() {
                    let mut folded = value.as_bytes().to_vec();
                    folded.push(b' ');
                    folded.extend_from_slice(line.trim_ascii());
                    *value = HeaderValue::from_bytes(&folded).map_err(ParseError::invalid_header)?;
                }
            }
            return Ok(());
        }

        ensure!(self.header_count < self.max_header_count, ParseError::too_many_headers(self.max_header_count));
        let (name, value) = header::parse_header_line(line)?;
        self.last_header = Some(name.clone());
        head.headers_mut().append(name, value);
        self.header_count += 1;
        Ok(())
    }

    fn on_headers_complete(&mut self, events: &mut Vec<InboundEvent>) -> Result<(), ParseError> {
        match self.head.take() {
            Some(Head::Request(header)) => self.on_request_head(header, events),
            Some(Head::Response(head)) => self.on_response_head(head, events),
            None => Err(ParseError::invalid_header("header section without start line")),
        }
    }

    fn on_request_head(&mut self, header: RequestHeader, events: &mut Vec<InboundEvent>) -> Result<(), ParseError> {
        let payload_size = header::select_payload(header.headers())?;
        let version = header.version();
        let persistent = header::is_persistent(version, header.headers()) && !payload_size.is_until_close();
        let expect_continue =
            version == Version::HTTP_11 && header::expects_continue(header.headers()) && !payload_size.is_empty();

        let seq = self.next_seq;
        self.next_seq += 1;
        self.persistent = persistent;

        debug!(seq, method = %header.method(), uri = %header.uri(), ?payload_size, "request head read");
        events.push(InboundEvent::Head { seq, head_request: header.method() == Method::HEAD, version, persistent, expect_continue });

        if payload_size.is_empty() {
            let request = header.body(InboundEntity::empty());
            events.push(InboundEvent::Request { seq, request });
            self.end_message(events);
            return Ok(());
        }

        let release = ReleaseHandle::new(Arc::clone(&self.busy), self.waker.clone());
        let (sender, entity) = InboundEntity::channel(payload_size, header.headers(), release, self.emit_at_headers);
        let request = header.body(entity);
        self.start_body(payload_size, sender);

        if self.emit_at_headers {
            events.push(InboundEvent::Request { seq, request });
        } else {
            self.deferred = Some((seq, request));
        }
        Ok(())
    }

    fn on_response_head(&mut self, mut head: ResponseHead, events: &mut Vec<InboundEvent>) -> Result<(), ParseError> {
        let status = head.status();
        if status.is_informational() {
            let reason = head.extensions_mut().remove::<ReasonPhrase>().map(|reason| reason.0).or_else(|| status.canonical_reason().map(str::to_owned));
            trace!(%status, "informational response read");
            self.informational.push((status, reason));
            self.message_state = MessageState::StartLine;
            return Ok(());
        }

        let Some(call) = self.pending.pop_front() else {
            return Err(ParseError::invalid_start_line("response without pending request"));
        };

        let payload_size = response_payload(&head, call.head)?;
        self.persistent = header::is_persistent(head.version(), head.headers()) && !payload_size.is_until_close();
        if !self.informational.is_empty() {
            head.extensions_mut().insert(Informational(mem::take(&mut self.informational)));
        }
        debug!(%status, ?payload_size, "response head read");

        if payload_size.is_empty() {
            let _ = call.responder.send(Ok(head.map(|()| InboundEntity::empty())));
            self.end_message(events);
            return Ok(());
        }

        let release = ReleaseHandle::new(Arc::clone(&self.busy), self.waker.clone());
        let (sender, entity) = InboundEntity::channel(payload_size, head.headers(), release, self.emit_at_headers);
        self.start_body(payload_size, sender);
        // a caller that gave up drops the entity, which releases it
        let _ = call.responder.send(Ok(head.map(|()| entity)));
        Ok(())
    }

    fn start_body(&mut self, payload_size: PayloadSize, sender: EntitySender) {
        self.decoder = Some(PayloadDecoder::from_payload_size(payload_size, self.max_line_length));
        self.sender = Some(sender);
        self.message_state = MessageState::Body;
    }

    /// Hands an item to the entity consumer, `false` when it has no room left and the way
    /// paused until it takes a chunk.
    fn forward(&mut self, item: PayloadItem) -> bool {
        let Some(sender) = self.sender.as_mut() else {
            return true;
        };
        match sender.send(item) {
            Forwarded::Sent => true,
            Forwarded::Released => {
                trace!("entity released before its end, discarding the rest");
                self.sender = None;
                true
            }
            Forwarded::Full(item) => {
                trace!(role = ?self.role, "entity consumer behind, inbound way paused");
                self.stash = Some(item);
                self.io_state = IoState::Idle;
                false
            }
        }
    }

    fn on_body_complete(&mut self, events: &mut Vec<InboundEvent>) {
        if self.forward(PayloadItem::Eof) {
            self.sender = None;
        }
        self.decoder = None;
        if let Some((seq, request)) = self.deferred.take() {
            events.push(InboundEvent::Request { seq, request });
        }
        self.end_message(events);
    }

    fn end_message(&mut self, events: &mut Vec<InboundEvent>) {
        self.message_state = MessageState::End;
        self.io_state = IoState::Idle;
        events.push(InboundEvent::Completed { persistent: self.persistent });
    }

    fn on_eof(&mut self, events: &mut Vec<InboundEvent>) -> Result<(), HttpError> {
        self.io_state = IoState::Idle;
        self.eof = true;

        match self.message_state {
            // the rest is decoded by `resume`
            MessageState::Body if self.stash.is_some() => Ok(()),
            MessageState::Body => loop {
                let Some(decoder) = self.decoder.as_mut() else {
                    return Err(ParseError::UnexpectedEof.into());
                };
                match decoder.decode_eof(self.buffer.bytes_mut())? {
                    Some(PayloadItem::Chunk(bytes)) => {
                        if !self.forward(PayloadItem::Chunk(bytes)) {
                            return Ok(());
                        }
                    }
                    Some(PayloadItem::Eof) => {
                        self.on_body_complete(events);
                        return Ok(());
                    }
                    None => return Err(ParseError::UnexpectedEof.into()),
                }
            },
            MessageState::Headers => Err(ParseError::UnexpectedEof.into()),
            MessageState::StartLine if self.line.is_partial() => Err(ParseError::UnexpectedEof.into()),
            MessageState::StartLine | MessageState::None | MessageState::End
                if !self.pending.is_empty() && !self.has_unread_input() =>
            {
                debug!(pending = self.pending.len(), "peer closed before answering");
                Err(HttpError::Closed)
            }
            MessageState::StartLine | MessageState::None | MessageState::End => {
                trace!(role = ?self.role, "peer closed between messages");
                Ok(())
            }
        }
    }

    /// Fails awaited responses and drops the entity being fed, its reader sees an early end.
    pub(crate) fn on_closed(&mut self, cause: Option<io::ErrorKind>) {
        for call in self.pending.drain(..) {
            let error = cause.map_or(HttpError::Closed, |kind| HttpError::from(io::Error::from(kind)));
            call.fail(error);
        }
        self.sender = None;
        self.stash = None;
        self.eof = false;
        self.decoder = None;
        self.deferred = None;
        self.head = None;
        self.io_state = IoState::Idle;
        self.message_state = MessageState::None;
    }

    /// Resets the way for another socket, keeping the buffer allocation.
    pub(crate) fn recycle(&mut self) {
        self.on_closed(None);
        self.buffer.clear();
        self.line.reset();
        self.header_count = 0;
        self.last_header = None;
        self.persistent = true;
        self.next_seq = 0;
        self.informational.clear();
        // a fresh flag: an entity still held elsewhere must not touch the next connection
        self.busy = Arc::new(AtomicBool::new(false));
    }
}

fn response_head(line: StatusLine) -> ResponseHead {
    let mut head = Response::new(());
    *head.status_mut() = line.status;
    *head.version_mut() = line.version;
    if let Some(reason) = line.custom_reason() {
        head.extensions_mut().insert(ReasonPhrase(reason.to_owned()));
    }
    head
}

/// Framing of a response entity, which also depends on the request it answers.
fn response_payload(head: &ResponseHead, head_request: bool) -> Result<PayloadSize, ParseError> {
    let status = head.status();
    if head_request || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return Ok(PayloadSize::Empty);
    }

    let headers = head.headers();
    let selected = header::select_payload(headers)?;
    let unframed = !header::is_chunked_encoding(headers) && header::content_length(headers)?.is_none();
    if unframed && head.version() == Version::HTTP_10 && !header::is_keep_alive(headers) {
        return Ok(PayloadSize::UntilClose);
    }
    Ok(selected)
}

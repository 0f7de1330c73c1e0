//! The writing half of a connection.
//!
//! Messages are laid out one part at a time (start line, each header line, the blank line,
//! then entity chunks) into the way's buffer, which is drained to the socket whenever it
//! accepts bytes. A part is only started when it fits in the remaining room, so the buffer
//! never grows much beyond its capacity whatever the size of the message.
//!
//! On the server side responses are written in the order their requests were read: every
//! request opens a [`Slot`] and only the oldest slot is ever written, once the handler has
//! filled it. On the client side requests are written in call order, each one registering
//! its pending response with the inbound way as it starts.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::mem;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::channel::oneshot;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Version};
use tokio_util::codec::Encoder;
use tracing::{debug, trace, warn};

use crate::codec::PayloadEncoder;
use crate::codec::start_line;
use crate::codec::Buffer;
use crate::config::ConnectorConfig;
use crate::handler::ConnectorService;
use crate::protocol::header;
use crate::protocol::{
    Chunk, Entity, HttpError, InboundEntity, PayloadItem, PayloadSize, ReasonPhrase, Representation, ResponseHead,
    SendError, continue_head,
};
use crate::way::{Direction, IoState, MessageState, PendingCall, Role, echo};

/// The place of a response in the pipeline, opened when its request header is read.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) seq: u64,
    pub(crate) head_request: bool,
    pub(crate) version: Version,
    pub(crate) persistent: bool,
    interim: VecDeque<ResponseHead>,
    response: Option<Response<Entity>>,
}

impl Slot {
    pub(crate) fn new(seq: u64, head_request: bool, version: Version, persistent: bool) -> Self {
        Self { seq, head_request, version, persistent, interim: VecDeque::new(), response: None }
    }

    pub(crate) fn is_filled(&self) -> bool {
        self.response.is_some()
    }
}

/// A client request waiting to be written.
#[derive(Debug)]
pub(crate) struct OutboundCall {
    pub(crate) request: Request<Entity>,
    pub(crate) responder: oneshot::Sender<Result<Response<InboundEntity>, HttpError>>,
}

#[derive(Debug)]
pub(crate) enum OutboundEvent {
    /// Client: a request started to be written, its response is expected next.
    RequestStarted(PendingCall),
    /// A final message has been fully laid out in the buffer.
    Completed { persistent: bool },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// The socket stopped accepting bytes, some are still buffered.
    WouldBlock,
    /// Everything ready has been written.
    Idle,
}

/// How many new messages a write pass may start.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StartPolicy {
    Unlimited,
    Once,
    Blocked,
}

/// A message being laid out into the buffer.
#[derive(Debug)]
struct Writing {
    start_line: BytesMut,
    headers: Vec<(HeaderName, HeaderValue)>,
    header_index: usize,
    phase: MessageState,
    entity: Entity,
    encoder: PayloadEncoder,
    informational: bool,
    persistent: bool,
    body_started: bool,
}

impl Writing {
    fn informational(version: Version, head: ResponseHead) -> Self {
        let (parts, ()) = head.into_parts();
        let reason = parts.extensions.get::<ReasonPhrase>().map(|reason| reason.0.as_str());
        let mut start_line = BytesMut::new();
        start_line::write_status_line(version, parts.status, reason, &mut start_line);

        Self {
            start_line,
            headers: header_list(parts.headers, &[]),
            header_index: 0,
            phase: MessageState::StartLine,
            entity: Entity::empty(),
            encoder: PayloadEncoder::empty(),
            informational: true,
            persistent: true,
            body_started: false,
        }
    }

    fn response(slot: &Slot, response: Response<Entity>, persisting: bool) -> Self {
        let (parts, mut entity) = response.into_parts();
        let status = parts.status;
        let version = slot.version;
        let mut persistent = slot.persistent && persisting && !header::is_connection_close(&parts.headers);

        let mut generated = vec![];
        if !parts.headers.contains_key(CONTENT_TYPE) {
            if let Some(value) = entity.media_type().and_then(|mime| HeaderValue::from_str(mime.as_ref()).ok()) {
                generated.push((CONTENT_TYPE, value));
            }
        }

        let bodyless = slot.head_request
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;

        let (payload_size, framed) = if bodyless {
            // a HEAD response announces what a GET would have carried
            if slot.head_request && !parts.headers.contains_key(CONTENT_LENGTH) && entity.is_available() {
                if let Some(size) = entity.size() {
                    generated.push((CONTENT_LENGTH, HeaderValue::from(size)));
                }
            }
            entity.release();
            (PayloadSize::Empty, slot.head_request)
        } else {
            match entity.size() {
                Some(0) => {
                    generated.push((CONTENT_LENGTH, HeaderValue::from(0u64)));
                    (PayloadSize::Empty, false)
                }
                Some(size) => {
                    generated.push((CONTENT_LENGTH, HeaderValue::from(size)));
                    (PayloadSize::Length(size), false)
                }
                None if version == Version::HTTP_11 => {
                    generated.push((TRANSFER_ENCODING, HeaderValue::from_static("chunked")));
                    (PayloadSize::Chunked, false)
                }
                None => {
                    persistent = false;
                    (PayloadSize::UntilClose, false)
                }
            }
        };

        connection_header(version, persistent, &mut generated);
        let reason = parts.extensions.get::<ReasonPhrase>().map(|reason| reason.0.as_str());
        let mut start_line = BytesMut::new();
        start_line::write_status_line(version, status, reason, &mut start_line);

        // the user keeps the framing headers of a HEAD response, they describe the entity
        let owned = if framed { vec![CONNECTION] } else { vec![CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION] };
        let mut headers = header_list(parts.headers, &owned);
        headers.extend(generated);

        Self {
            start_line,
            headers,
            header_index: 0,
            phase: MessageState::StartLine,
            entity,
            encoder: PayloadEncoder::from_payload_size(payload_size),
            informational: false,
            persistent,
            body_started: false,
        }
    }

    fn request(request: Request<Entity>, persisting: bool) -> Result<Self, SendError> {
        let (parts, entity) = request.into_parts();
        let version = parts.version;
        let persistent = persisting && !header::is_connection_close(&parts.headers);

        let mut generated = vec![];
        if !parts.headers.contains_key(HOST) {
            if let Some(host) = parts.uri.host() {
                let host = match parts.uri.port_u16() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_owned(),
                };
                let value = HeaderValue::try_from(host).map_err(SendError::invalid_body)?;
                generated.push((HOST, value));
            }
        }
        if !parts.headers.contains_key(CONTENT_TYPE) {
            if let Some(value) = entity.media_type().and_then(|mime| HeaderValue::from_str(mime.as_ref()).ok()) {
                generated.push((CONTENT_TYPE, value));
            }
        }

        let payload_size = match entity.size() {
            Some(0) => {
                if matches!(parts.method, Method::POST | Method::PUT | Method::PATCH) {
                    generated.push((CONTENT_LENGTH, HeaderValue::from(0u64)));
                }
                PayloadSize::Empty
            }
            Some(size) => {
                generated.push((CONTENT_LENGTH, HeaderValue::from(size)));
                PayloadSize::Length(size)
            }
            None if version == Version::HTTP_11 => {
                generated.push((TRANSFER_ENCODING, HeaderValue::from_static("chunked")));
                PayloadSize::Chunked
            }
            None => return Err(SendError::unsupported("an entity of unknown size needs HTTP/1.1")),
        };

        connection_header(version, persistent, &mut generated);
        let mut start_line = BytesMut::new();
        start_line::write_request_line(&parts.method, &parts.uri, version, &mut start_line);

        let mut headers = header_list(parts.headers, &[CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION]);
        headers.extend(generated);

        Ok(Self {
            start_line,
            headers,
            header_index: 0,
            phase: MessageState::StartLine,
            entity,
            encoder: PayloadEncoder::from_payload_size(payload_size),
            informational: false,
            persistent,
            body_started: false,
        })
    }

    /// Lays out as much of the message as fits, returns `true` once it is complete.
    fn fill(&mut self, buffer: &mut Buffer, service: Option<&dyn ConnectorService>) -> Result<bool, HttpError> {
        loop {
            match self.phase {
                MessageState::None | MessageState::StartLine => {
                    if !fits(buffer, self.start_line.len()) {
                        return Ok(false);
                    }
                    buffer.bytes_mut().extend_from_slice(&self.start_line);
                    self.phase = MessageState::Headers;
                }

                MessageState::Headers => {
                    if let Some((name, value)) = self.headers.get(self.header_index) {
                        if !fits(buffer, header::header_line_len(name, value)) {
                            return Ok(false);
                        }
                        header::write_header_line(name, value, buffer.bytes_mut());
                        self.header_index += 1;
                    } else {
                        if !fits(buffer, 2) {
                            return Ok(false);
                        }
                        buffer.bytes_mut().extend_from_slice(b"\r\n");
                        self.phase = MessageState::Body;
                    }
                }

                MessageState::Body => {
                    if self.encoder.is_empty() {
                        self.phase = MessageState::End;
                        continue;
                    }
                    if !self.body_started {
                        if let Some(service) = service {
                            service.before_send(&self.entity);
                        }
                        self.body_started = true;
                    }

                    let room = buffer.remaining_capacity().saturating_sub(self.encoder.overhead());
                    if room == 0 && !buffer.is_empty() {
                        return Ok(false);
                    }

                    match self.entity.read_chunk(room.max(1)) {
                        Ok(Chunk::Data(bytes)) => self.encoder.encode(PayloadItem::Chunk(bytes), buffer.bytes_mut())?,
                        // the way goes idle, the entity reader wakes the controller
                        Ok(Chunk::Pending) => return Ok(false),
                        Ok(Chunk::End) => {
                            self.encoder.encode(PayloadItem::<Bytes>::Eof, buffer.bytes_mut())?;
                            if let Some(service) = service {
                                service.after_send(&self.entity);
                            }
                            self.phase = MessageState::End;
                        }
                        Err(e) => {
                            warn!(cause = %e, "unable to read outbound entity, the connection closes after it");
                            self.persistent = false;
                            self.phase = MessageState::End;
                        }
                    }
                }

                MessageState::End => return Ok(true),
            }
        }
    }
}

fn fits(buffer: &Buffer, len: usize) -> bool {
    buffer.is_empty() || buffer.remaining_capacity() >= len
}

fn connection_header(version: Version, persistent: bool, generated: &mut Vec<(HeaderName, HeaderValue)>) {
    if !persistent {
        generated.push((CONNECTION, HeaderValue::from_static("close")));
    } else if version == Version::HTTP_10 {
        generated.push((CONNECTION, HeaderValue::from_static("keep-alive")));
    }
}

/// Flattens a header map in its iteration order, leaving out the `owned` names.
fn header_list(headers: HeaderMap, owned: &[HeaderName]) -> Vec<(HeaderName, HeaderValue)> {
    let mut list = Vec::with_capacity(headers.len());
    let mut current: Option<HeaderName> = None;
    for (name, value) in headers {
        if let Some(name) = name {
            current = Some(name);
        }
        if let Some(name) = current.as_ref().filter(|name| !owned.contains(name)) {
            list.push((name.clone(), value));
        }
    }
    list
}

pub struct OutboundWay {
    role: Role,
    buffer: Buffer,
    io_state: IoState,
    tracing: bool,
    persisting: bool,
    /// Set once a non persistent message is written, nothing may follow it.
    closing: bool,

    slots: VecDeque<Slot>,
    calls: VecDeque<OutboundCall>,
    current: Option<Writing>,
    service: Option<Arc<dyn ConnectorService>>,
}

impl std::fmt::Debug for OutboundWay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundWay")
            .field("role", &self.role)
            .field("buffered", &self.buffer.len())
            .field("io_state", &self.io_state)
            .field("slots", &self.slots.len())
            .field("calls", &self.calls.len())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl OutboundWay {
    pub(crate) fn new(role: Role, config: &ConnectorConfig, service: Option<Arc<dyn ConnectorService>>) -> Self {
        Self {
            role,
            buffer: Buffer::with_capacity(config.outbound_buffer_size()),
            io_state: IoState::Idle,
            tracing: config.tracing(),
            persisting: config.persisting_connections(),
            closing: false,
            slots: VecDeque::new(),
            calls: VecDeque::new(),
            current: None,
            service,
        }
    }

    pub fn io_state(&self) -> IoState {
        self.io_state
    }

    pub fn message_state(&self) -> MessageState {
        self.current.as_ref().map_or(MessageState::None, |writing| writing.phase)
    }

    /// Server: reserves the place of the response to request `seq`.
    pub(crate) fn open_slot(&mut self, slot: Slot, expect_continue: bool) {
        let mut slot = slot;
        if expect_continue {
            slot.interim.push_back(continue_head());
        }
        trace!(seq = slot.seq, "response slot opened");
        self.slots.push_back(slot);
    }

    /// Server: hands the response to request `seq` over, `false` when its slot is gone.
    pub(crate) fn fill_slot(&mut self, seq: u64, response: Response<Entity>) -> bool {
        match self.slots.iter_mut().find(|slot| slot.seq == seq) {
            Some(slot) if !slot.is_filled() => {
                slot.response = Some(response);
                true
            }
            _ => {
                debug!(seq, "no open slot for the response, dropping it");
                false
            }
        }
    }

    pub(crate) fn open_slots(&self) -> usize {
        self.slots.len()
    }

    /// Client: queues a request behind the others.
    pub(crate) fn enqueue(&mut self, call: OutboundCall) {
        self.calls.push_back(call);
    }

    pub(crate) fn has_queued_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    pub(crate) fn queued_calls(&self) -> usize {
        self.calls.len()
    }

    /// Client: gives up the calls not started yet.
    pub(crate) fn take_queued_calls(&mut self) -> VecDeque<OutboundCall> {
        mem::take(&mut self.calls)
    }

    pub(crate) fn is_writing(&self) -> bool {
        self.current.is_some() || !self.buffer.is_empty()
    }

    /// Whether something could be written right now or is waiting to be.
    pub(crate) fn has_pending_work(&self) -> bool {
        self.is_writing() || !self.calls.is_empty() || !self.slots.is_empty()
    }

    pub(crate) fn has_ready_work(&self) -> bool {
        self.is_writing()
            || !self.calls.is_empty()
            || self.slots.front().is_some_and(|slot| slot.is_filled() || !slot.interim.is_empty())
    }

    pub fn load_score(&self) -> usize {
        self.calls.len() + usize::from(self.current.is_some())
    }

    /// Lays out ready messages and drains them to the writer until it would block or
    /// there is nothing left to write.
    pub(crate) fn write_to<W: Write>(
        &mut self,
        writer: &mut W,
        policy: &mut StartPolicy,
        events: &mut Vec<OutboundEvent>,
    ) -> Result<WriteOutcome, HttpError> {
        loop {
            self.fill_buffer(policy, events)?;
            if self.buffer.is_empty() {
                self.io_state = IoState::Idle;
                return Ok(WriteOutcome::Idle);
            }

            let traced = self.tracing.then(|| Bytes::copy_from_slice(self.buffer.bytes()));
            let written = self.buffer.drain(writer)?;
            trace!(direction = ?Direction::Outbound, bytes = written, "written to socket");
            if let Some(traced) = traced {
                echo(Direction::Outbound, &traced[..written]);
            }

            if !self.buffer.is_empty() {
                self.io_state = IoState::WriteInterest;
                return Ok(WriteOutcome::WouldBlock);
            }
        }
    }

    fn fill_buffer(&mut self, policy: &mut StartPolicy, events: &mut Vec<OutboundEvent>) -> Result<(), HttpError> {
        loop {
            if self.current.is_none() && !self.start_next(policy, events) {
                return Ok(());
            }
            let Some(writing) = self.current.as_mut() else {
                return Ok(());
            };
            if !writing.fill(&mut self.buffer, self.service.as_deref())? {
                return Ok(());
            }
            self.complete(events);
        }
    }

    fn start_next(&mut self, policy: &mut StartPolicy, events: &mut Vec<OutboundEvent>) -> bool {
        if self.closing {
            return false;
        }

        match self.role {
            Role::Server => {
                let Some(slot) = self.slots.front_mut() else {
                    return false;
                };
                if let Some(head) = slot.interim.pop_front() {
                    self.current = Some(Writing::informational(slot.version, head));
                    return true;
                }
                let Some(response) = slot.response.take() else {
                    return false;
                };
                trace!(seq = slot.seq, status = %response.status(), "response started");
                self.current = Some(Writing::response(slot, response, self.persisting));
                true
            }

            Role::Client => loop {
                if *policy == StartPolicy::Blocked {
                    return false;
                }
                let Some(call) = self.calls.pop_front() else {
                    return false;
                };

                let head = call.request.method() == Method::HEAD;
                trace!(method = %call.request.method(), uri = %call.request.uri(), "request started");
                match Writing::request(call.request, self.persisting) {
                    Ok(writing) => {
                        self.current = Some(writing);
                        events.push(OutboundEvent::RequestStarted(PendingCall { head, responder: call.responder }));
                        if *policy == StartPolicy::Once {
                            *policy = StartPolicy::Blocked;
                        }
                        return true;
                    }
                    Err(e) => {
                        debug!(cause = %e, "request can't be written");
                        let _ = call.responder.send(Err(e.into()));
                    }
                }
            },
        }
    }

    fn complete(&mut self, events: &mut Vec<OutboundEvent>) {
        let Some(writing) = self.current.take() else {
            return;
        };
        if writing.informational {
            return;
        }

        if self.role == Role::Server {
            self.slots.pop_front();
        }
        if !writing.persistent {
            self.closing = true;
        }
        events.push(OutboundEvent::Completed { persistent: writing.persistent });
    }

    /// Fails the queued calls and drops everything not written yet.
    pub(crate) fn on_closed(&mut self, cause: Option<io::ErrorKind>) {
        for call in self.calls.drain(..) {
            let error = cause.map_or(HttpError::Closed, |kind| HttpError::from(io::Error::from(kind)));
            let _ = call.responder.send(Err(error));
        }
        self.slots.clear();
        self.current = None;
        self.buffer.clear();
        self.io_state = IoState::Idle;
    }

    pub(crate) fn recycle(&mut self) {
        self.on_closed(None);
        self.closing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::io::{Cursor, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn crlf(text: &str) -> String {
        text.replace('\n', "\r\n")
    }

    fn server_way(config: &ConnectorConfig) -> OutboundWay {
        OutboundWay::new(Role::Server, config, None)
    }

    fn write_all(way: &mut OutboundWay) -> (String, Vec<OutboundEvent>) {
        let mut out = vec![];
        let mut events = vec![];
        let outcome = way.write_to(&mut out, &mut StartPolicy::Unlimited, &mut events).unwrap();
        assert_eq!(outcome, WriteOutcome::Idle);
        (String::from_utf8(out).unwrap(), events)
    }

    fn respond(way: &mut OutboundWay, version: Version, head_request: bool, response: Response<Entity>) -> String {
        way.open_slot(Slot::new(0, head_request, version, true), false);
        assert!(way.fill_slot(0, response));
        write_all(way).0
    }

    /// Accepts `step` bytes per write, blocking every other call.
    struct Trickle {
        out: Vec<u8>,
        step: usize,
        block: bool,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.block = !self.block;
            if self.block {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.step);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn response_with_known_size() {
        let mut way = server_way(&ConnectorConfig::default());
        let response = Response::builder()
            .header("X-Trace", "1")
            .body(Entity::full("hello world").with_media_type(mime::TEXT_PLAIN))
            .unwrap();

        let expected = crlf(indoc! {r"
            HTTP/1.1 200 OK
            x-trace: 1
            content-type: text/plain
            content-length: 11

            hello world"});
        assert_eq!(respond(&mut way, Version::HTTP_11, false, response), expected);
        assert_eq!(way.open_slots(), 0);
    }

    #[test]
    fn response_with_unknown_size() {
        let mut way = server_way(&ConnectorConfig::default());
        let response = Response::new(Entity::reader(Cursor::new(b"abc".to_vec()), None));

        let expected = crlf(indoc! {r"
            HTTP/1.1 200 OK
            transfer-encoding: chunked

            3
            abc
            0

        "});
        assert_eq!(respond(&mut way, Version::HTTP_11, false, response), expected);
    }

    #[test]
    fn http10_response_with_unknown_size_closes() {
        let mut way = server_way(&ConnectorConfig::default());
        way.open_slot(Slot::new(0, false, Version::HTTP_10, true), false);
        way.fill_slot(0, Response::new(Entity::reader(Cursor::new(b"abc".to_vec()), None)));

        let (out, events) = write_all(&mut way);
        assert_eq!(out, "HTTP/1.0 200 OK\r\nconnection: close\r\n\r\nabc");
        assert!(matches!(events[..], [OutboundEvent::Completed { persistent: false }]));
    }

    #[test]
    fn http10_keep_alive() {
        let mut way = server_way(&ConnectorConfig::default());
        let out = respond(&mut way, Version::HTTP_10, false, Response::new(Entity::empty()));
        assert_eq!(out, "HTTP/1.0 200 OK\r\ncontent-length: 0\r\nconnection: keep-alive\r\n\r\n");
    }

    #[test]
    fn bodyless_responses() {
        let mut way = server_way(&ConnectorConfig::default());
        let out = respond(&mut way, Version::HTTP_11, true, Response::new(Entity::full("0123456789")));
        assert_eq!(out, "HTTP/1.1 200 OK\r\ncontent-length: 10\r\n\r\n");

        let no_content = Response::builder().status(StatusCode::NO_CONTENT).body(Entity::full("ignored")).unwrap();
        let out = respond(&mut way, Version::HTTP_11, false, no_content);
        assert_eq!(out, "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn custom_reason_phrase() {
        let mut way = server_way(&ConnectorConfig::default());
        let mut response = Response::builder().status(StatusCode::NOT_FOUND).body(Entity::empty()).unwrap();
        response.extensions_mut().insert(ReasonPhrase("Gone Fishing".to_owned()));
        let out = respond(&mut way, Version::HTTP_11, false, response);
        assert!(out.starts_with("HTTP/1.1 404 Gone Fishing\r\n"));
    }

    #[test]
    fn responses_follow_request_order() {
        let mut way = server_way(&ConnectorConfig::default());
        for seq in 0..3 {
            way.open_slot(Slot::new(seq, false, Version::HTTP_11, true), false);
        }

        way.fill_slot(2, Response::new(Entity::full("third")));
        assert_eq!(write_all(&mut way).0, "");

        way.fill_slot(0, Response::new(Entity::full("first")));
        let (out, events) = write_all(&mut way);
        assert!(out.ends_with("first"));
        assert_eq!(events.len(), 1);

        way.fill_slot(1, Response::new(Entity::full("second")));
        let (out, events) = write_all(&mut way);
        let second = out.find("second").unwrap();
        let third = out.find("third").unwrap();
        assert!(second < third);
        assert_eq!(events.len(), 2);
        assert!(!way.has_pending_work());
    }

    #[test]
    fn continue_goes_first() {
        let mut way = server_way(&ConnectorConfig::default());
        way.open_slot(Slot::new(0, false, Version::HTTP_11, true), true);
        let (out, events) = write_all(&mut way);
        assert_eq!(out, "HTTP/1.1 100 Continue\r\n\r\n");
        assert!(events.is_empty());

        way.fill_slot(0, Response::new(Entity::empty()));
        let (out, _) = write_all(&mut way);
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn small_buffer_and_slow_socket() {
        let body = "x".repeat(1000);
        let response = || {
            Response::builder()
                .header("X-Long", "y".repeat(100))
                .body(Entity::reader(Cursor::new(body.clone().into_bytes()), Some(1000)))
                .unwrap()
        };

        let mut way = server_way(&ConnectorConfig::default());
        let expected = respond(&mut way, Version::HTTP_11, false, response());

        let config = ConnectorConfig::builder().outbound_buffer_size(32).build().unwrap();
        let mut way = server_way(&config);
        way.open_slot(Slot::new(0, false, Version::HTTP_11, true), false);
        way.fill_slot(0, response());

        let mut socket = Trickle { out: vec![], step: 7, block: false };
        let mut events = vec![];
        while way.write_to(&mut socket, &mut StartPolicy::Unlimited, &mut events).unwrap() == WriteOutcome::WouldBlock {
            assert_eq!(way.io_state(), IoState::WriteInterest);
        }
        assert_eq!(String::from_utf8(socket.out).unwrap(), expected);
        assert_eq!(way.io_state(), IoState::Idle);
    }

    /// Hands out what the test sends, blocking in between like a pipe.
    struct Pipe(mpsc::Receiver<Vec<u8>>);

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Err(_closed) => Ok(0),
            }
        }
    }

    #[test]
    fn slow_reader_leaves_the_way_idle() {
        let (feeder, pipe) = mpsc::channel();
        let mut way = server_way(&ConnectorConfig::default());
        way.open_slot(Slot::new(0, false, Version::HTTP_11, true), false);
        way.fill_slot(0, Response::new(Entity::reader(Pipe(pipe), None).detach_reader(None, 64)));

        let (out, events) = write_all(&mut way);
        assert_eq!(out, "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n");
        assert!(events.is_empty());
        assert!(way.is_writing());
        assert_eq!(way.io_state(), IoState::Idle);

        feeder.send(b"slow".to_vec()).unwrap();
        drop(feeder);
        let mut out = String::new();
        for _ in 0..1000 {
            let (more, events) = write_all(&mut way);
            out.push_str(&more);
            if !events.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(out, "4\r\nslow\r\n0\r\n\r\n");
        assert!(!way.is_writing());
    }

    #[test]
    fn service_hooks_bracket_the_entity() {
        #[derive(Default)]
        struct Counting {
            before: AtomicUsize,
            after: AtomicUsize,
        }

        impl ConnectorService for Counting {
            fn before_send(&self, _entity: &Entity) {
                self.before.fetch_add(1, Ordering::SeqCst);
            }

            fn after_send(&self, _entity: &Entity) {
                self.after.fetch_add(1, Ordering::SeqCst);
            }
        }

        let service = Arc::new(Counting::default());
        let hooks: Arc<dyn ConnectorService> = Arc::clone(&service) as Arc<dyn ConnectorService>;
        let mut way = OutboundWay::new(Role::Server, &ConnectorConfig::default(), Some(hooks));
        respond(&mut way, Version::HTTP_11, false, Response::new(Entity::full("body")));

        assert_eq!(service.before.load(Ordering::SeqCst), 1);
        assert_eq!(service.after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn client_requests() {
        let mut way = OutboundWay::new(Role::Client, &ConnectorConfig::default(), None);
        for path in ["/a", "/b"] {
            let (responder, _receiver) = oneshot::channel();
            let request = Request::post(format!("http://example.com:8080{path}")).body(Entity::empty()).unwrap();
            way.enqueue(OutboundCall { request, responder });
        }

        let mut out = vec![];
        let mut events = vec![];
        let mut policy = StartPolicy::Once;
        way.write_to(&mut out, &mut policy, &mut events).unwrap();

        let expected = crlf(indoc! {r"
            POST /a HTTP/1.1
            host: example.com:8080
            content-length: 0

        "});
        assert_eq!(String::from_utf8(out).unwrap(), expected);
        assert!(matches!(events[..], [OutboundEvent::RequestStarted(_), OutboundEvent::Completed { persistent: true }]));
        assert_eq!(policy, StartPolicy::Blocked);
        assert!(way.has_queued_calls());
    }

    #[test]
    fn client_request_with_streamed_entity() {
        let mut way = OutboundWay::new(Role::Client, &ConnectorConfig::default(), None);
        let (responder, _receiver) = oneshot::channel();
        let request = Request::put("http://h/upload")
            .header(CONNECTION, "close")
            .body(Entity::reader(Cursor::new(b"data".to_vec()), None))
            .unwrap();
        way.enqueue(OutboundCall { request, responder });

        let mut out = vec![];
        let mut events = vec![];
        way.write_to(&mut out, &mut StartPolicy::Unlimited, &mut events).unwrap();

        let expected = crlf(indoc! {r"
            PUT /upload HTTP/1.1
            host: h
            transfer-encoding: chunked
            connection: close

            4
            data
            0

        "});
        assert_eq!(String::from_utf8(out).unwrap(), expected);
        assert!(matches!(events[1], OutboundEvent::Completed { persistent: false }));
    }

    #[test]
    fn closing_fails_queued_calls() {
        let mut way = OutboundWay::new(Role::Client, &ConnectorConfig::default(), None);
        let (responder, mut receiver) = oneshot::channel();
        way.enqueue(OutboundCall { request: Request::new(Entity::empty()), responder });

        way.on_closed(Some(io::ErrorKind::ConnectionReset));
        assert!(matches!(receiver.try_recv().unwrap().unwrap(), Err(HttpError::Transport { .. })));
    }
}

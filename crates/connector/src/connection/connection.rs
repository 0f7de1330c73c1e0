use std::io;
use std::mem;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Request, Response};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token, Waker};
use tracing::{debug, trace, warn};

use crate::config::ConnectorConfig;
use crate::connection::TlsInfo;
use crate::handler::ConnectorService;
use crate::protocol::{Entity, ErrorKind, HttpError, InboundEntity};
use crate::way::{
    InboundEvent, InboundWay, IoState, OutboundCall, OutboundEvent, OutboundWay, ReadOutcome, Role, Slot, StartPolicy,
    WriteOutcome,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Client: the non blocking connect is in progress.
    Opening,
    Open,
    /// Flushing what is left before closing.
    Closing,
    #[default]
    Closed,
}

/// A request read by a server connection, to be handed to the handler.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub(crate) token: Token,
    pub(crate) seq: u64,
    pub(crate) request: Request<InboundEntity>,
}

/// One socket with its inbound and outbound way.
///
/// Connections are driven by a single controller thread: readiness is recorded with
/// [`Connection::on_ready`], then [`Connection::drive`] moves bytes through both ways
/// until neither can make progress.
#[derive(Debug)]
pub struct Connection {
    token: Token,
    role: Role,
    socket: Option<TcpStream>,
    peer: Option<SocketAddr>,
    persisting: bool,
    persistent: bool,
    pipelining: bool,
    state: ConnectionState,
    inbound: InboundWay,
    outbound: OutboundWay,
    tls: Option<TlsInfo>,
    last_activity: Instant,

    readable: bool,
    writable: bool,
    peer_closed: bool,
    registered: Option<Interest>,
    /// Client calls never started here, to be handed to another connection.
    stranded: Vec<OutboundCall>,
}

impl Connection {
    pub(crate) fn new(
        role: Role,
        config: &ConnectorConfig,
        waker: Option<Arc<Waker>>,
        service: Option<Arc<dyn ConnectorService>>,
    ) -> Self {
        Self {
            token: Token(usize::MAX),
            role,
            socket: None,
            peer: None,
            persisting: config.persisting_connections(),
            persistent: config.persisting_connections(),
            pipelining: config.pipelining_connections(),
            state: ConnectionState::Closed,
            inbound: InboundWay::new(role, config, waker),
            outbound: OutboundWay::new(role, config, service),
            tls: None,
            last_activity: Instant::now(),
            readable: false,
            writable: false,
            peer_closed: false,
            registered: None,
            stranded: vec![],
        }
    }

    /// Binds the connection to a socket. Server sockets are already connected, client
    /// ones are opened once the connect completes.
    pub(crate) fn attach(&mut self, socket: TcpStream, token: Token, peer: SocketAddr) {
        self.socket = Some(socket);
        self.token = token;
        self.peer = Some(peer);
        self.state = ConnectionState::Opening;
        self.last_activity = Instant::now();
    }

    /// Attaches what the TLS layer in front of the socket negotiated.
    pub(crate) fn set_tls(&mut self, tls: TlsInfo) {
        self.tls = Some(tls);
    }

    pub fn open(&mut self) {
        trace!(token = ?self.token, peer = ?self.peer, role = ?self.role, "connection opened");
        self.state = ConnectionState::Open;
        self.inbound.arm();
        if self.role == Role::Server {
            self.readable = true;
            self.writable = true;
        }
    }

    /// Closes the connection. A graceful close first flushes what the outbound way holds.
    pub fn close(&mut self, graceful: bool) {
        self.close_with(graceful, None);
    }

    fn close_with(&mut self, graceful: bool, cause: Option<io::ErrorKind>) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if graceful && self.socket.is_some() && self.outbound.is_writing() {
            trace!(token = ?self.token, "closing once the outbound way is flushed");
            self.state = ConnectionState::Closing;
            return;
        }

        if let Some(socket) = self.socket.take() {
            if self.tls.is_none() {
                if let Err(e) = socket.shutdown(Shutdown::Both) {
                    debug!(token = ?self.token, cause = %e, "unable to shut the socket down");
                }
            }
        }
        self.inbound.on_closed(cause);
        self.outbound.on_closed(cause);
        self.registered = None;
        self.state = ConnectionState::Closed;
        debug!(token = ?self.token, peer = ?self.peer, "connection closed");
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn is_pipelining(&self) -> bool {
        self.pipelining
    }

    pub fn inbound(&self) -> &InboundWay {
        &self.inbound
    }

    pub fn outbound(&self) -> &OutboundWay {
        &self.outbound
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Whether a message is being read or written, queued, or held by its consumer.
    pub fn is_busy(&self) -> bool {
        self.inbound.is_busy() || self.outbound.has_pending_work()
    }

    pub fn load_score(&self) -> usize {
        self.inbound.load_score() + self.outbound.load_score()
    }

    /// Whether a client call may be handed to this connection right away.
    pub fn is_available(&self) -> bool {
        self.persistent && self.state == ConnectionState::Open && !self.is_busy()
    }

    pub(crate) fn is_idle_expired(&self, now: Instant, max_idle: Duration) -> bool {
        self.state == ConnectionState::Open && !self.is_busy() && now.duration_since(self.last_activity) >= max_idle
    }

    pub fn ssl_cipher_suite(&self) -> Option<&str> {
        self.tls.as_ref().map(TlsInfo::cipher_suite)
    }

    pub fn ssl_peer_certificates(&self) -> Option<&[Vec<u8>]> {
        self.tls.as_ref().and_then(TlsInfo::peer_certificates)
    }

    pub fn ssl_key_size(&self) -> Option<u32> {
        self.tls.as_ref().and_then(TlsInfo::key_size)
    }

    /// Server: hands the response to request `seq` over to the outbound way.
    pub(crate) fn commit_response(&mut self, seq: u64, response: Response<Entity>) -> bool {
        self.state != ConnectionState::Closed && self.outbound.fill_slot(seq, response)
    }

    /// Client: queues a request, it is written once the connection allows it.
    pub(crate) fn enqueue_request(&mut self, call: OutboundCall) {
        self.outbound.enqueue(call);
    }

    /// Client: the queued calls a closing connection gave up without starting them.
    pub(crate) fn take_stranded_calls(&mut self) -> Vec<OutboundCall> {
        mem::take(&mut self.stranded)
    }

    /// Records socket readiness reported by the selector.
    pub(crate) fn on_ready(&mut self, readable: bool, writable: bool) {
        self.readable |= readable;
        self.writable |= writable;

        if self.state == ConnectionState::Opening && writable {
            match self.connect_result() {
                Ok(true) => self.open(),
                Ok(false) => {}
                Err(e) => {
                    debug!(token = ?self.token, peer = ?self.peer, cause = %e, "connect failed");
                    self.close_with(false, Some(e.kind()));
                }
            }
        }
    }

    /// Whether the pending connect completed, following the mio recipe.
    fn connect_result(&self) -> io::Result<bool> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        if let Some(e) = socket.take_error()? {
            return Err(e);
        }
        match socket.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Moves bytes through both ways until neither makes progress, collecting the
    /// requests to hand to the handler.
    pub(crate) fn drive(&mut self, dispatches: &mut Vec<Dispatch>) {
        if let Err(e) = self.try_drive(dispatches) {
            self.on_error(&e);
            return;
        }
        self.settle();
    }

    fn try_drive(&mut self, dispatches: &mut Vec<Dispatch>) -> Result<(), HttpError> {
        loop {
            let mut progressed = false;

            if matches!(self.state, ConnectionState::Open | ConnectionState::Closing)
                && self.writable
                && self.outbound.has_ready_work()
            {
                let mut policy = self.start_policy();
                let mut events = vec![];
                let Some(socket) = self.socket.as_mut() else {
                    return Ok(());
                };
                if self.outbound.write_to(socket, &mut policy, &mut events)? == WriteOutcome::WouldBlock {
                    self.writable = false;
                }
                self.last_activity = Instant::now();
                progressed |= !events.is_empty();
                for event in events {
                    self.on_outbound_event(event);
                }
            }

            if self.state == ConnectionState::Open {
                let mut events = vec![];
                progressed |= self.inbound.resume(&mut events)?;
                let allowed = self.read_allowed();
                self.inbound.try_rearm(allowed);
                if self.inbound.io_state() == IoState::ReadInterest && (self.readable || self.inbound.has_buffered_bytes()) {
                    let Some(socket) = self.socket.as_mut() else {
                        return Ok(());
                    };
                    match self.inbound.read_from(socket, &mut events)? {
                        ReadOutcome::WouldBlock => self.readable = false,
                        ReadOutcome::Eof => {
                            trace!(token = ?self.token, "peer closed its side");
                            self.readable = false;
                            self.peer_closed = true;
                        }
                        ReadOutcome::Paused => {}
                    }
                    self.last_activity = Instant::now();
                }
                progressed |= !events.is_empty();
                for event in events {
                    self.on_inbound_event(event, dispatches);
                }
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    /// Closes the connection once nothing more can happen on it.
    fn settle(&mut self) {
        match self.state {
            ConnectionState::Open if self.is_spent() => {
                if self.outbound.has_queued_calls() {
                    debug!(token = ?self.token, calls = self.outbound.queued_calls(), "closing with calls not started");
                    self.stranded.extend(self.outbound.take_queued_calls());
                }
                self.close(true);
            }
            ConnectionState::Closing if !self.outbound.is_writing() => self.close(false),
            _ => {}
        }
    }

    /// Whether the connection has nothing left to exchange.
    fn is_spent(&self) -> bool {
        match self.role {
            Role::Server => (self.peer_closed || !self.persistent) && !self.is_busy(),
            // awaited responses can't come anymore once what the peer sent is consumed
            Role::Client if self.peer_closed => !self.inbound.has_unread_input() && !self.inbound.is_entity_busy(),
            Role::Client if !self.persistent => !self.inbound.is_busy() && !self.outbound.is_writing(),
            Role::Client => false,
        }
    }

    fn start_policy(&self) -> StartPolicy {
        match self.role {
            Role::Server => StartPolicy::Unlimited,
            Role::Client if !self.persistent => StartPolicy::Blocked,
            Role::Client if self.pipelining => StartPolicy::Unlimited,
            Role::Client if self.inbound.has_pending_calls() || self.inbound.is_busy() => StartPolicy::Blocked,
            Role::Client => StartPolicy::Once,
        }
    }

    fn read_allowed(&self) -> bool {
        // what the peer sent before closing is still read
        if self.peer_closed && !self.inbound.has_buffered_bytes() {
            return false;
        }
        match self.role {
            Role::Server => self.persistent && (self.pipelining || self.outbound.open_slots() == 0),
            Role::Client => true,
        }
    }

    fn on_inbound_event(&mut self, event: InboundEvent, dispatches: &mut Vec<Dispatch>) {
        match event {
            InboundEvent::Head { seq, head_request, version, persistent, expect_continue } => {
                self.persistent &= persistent;
                let slot = Slot::new(seq, head_request, version, self.persistent);
                self.outbound.open_slot(slot, expect_continue);
            }
            InboundEvent::Request { seq, mut request } => {
                if let Some(peer) = self.peer {
                    request.extensions_mut().insert(peer);
                }
                if let Some(tls) = &self.tls {
                    request.extensions_mut().insert(tls.clone());
                }
                dispatches.push(Dispatch { token: self.token, seq, request });
            }
            InboundEvent::Completed { persistent } => {
                self.persistent &= persistent;
            }
        }
    }

    fn on_outbound_event(&mut self, event: OutboundEvent) {
        match event {
            OutboundEvent::RequestStarted(call) => self.inbound.expect(call),
            OutboundEvent::Completed { persistent } => {
                self.persistent &= persistent;
                if !persistent && self.role == Role::Server {
                    self.close(true);
                }
            }
        }
    }

    /// Logs the failure then closes the connection abruptly.
    pub fn on_error(&mut self, error: &HttpError) {
        match (error, error.kind()) {
            (HttpError::Send { .. }, _) => warn!(token = ?self.token, peer = ?self.peer, cause = %error, "unable to send message"),
            (_, ErrorKind::Framing) => debug!(token = ?self.token, peer = ?self.peer, cause = %error, "malformed message"),
            _ => debug!(token = ?self.token, peer = ?self.peer, cause = %error, "transport failure"),
        }
        let cause = match error {
            HttpError::Transport { source } => Some(source.kind()),
            _ => None,
        };
        self.close_with(false, cause);
    }

    /// The interest the ways currently need, `None` when the socket should be left alone.
    fn interest(&self) -> Option<Interest> {
        match self.state {
            ConnectionState::Opening => Some(Interest::WRITABLE),
            ConnectionState::Open | ConnectionState::Closing => {
                let read = (!self.peer_closed).then_some(Interest::READABLE);
                let write = (self.outbound.io_state() == IoState::WriteInterest).then_some(Interest::WRITABLE);
                match (read, write) {
                    (Some(read), Some(write)) => Some(read.add(write)),
                    (read, write) => read.or(write),
                }
            }
            ConnectionState::Closed => None,
        }
    }

    /// Registers, re-registers or deregisters the socket to match the ways' interest.
    pub(crate) fn register_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let wanted = self.interest();
        if wanted == self.registered {
            return Ok(());
        }
        let Some(socket) = self.socket.as_mut() else {
            self.registered = None;
            return Ok(());
        };

        match (self.registered, wanted) {
            (None, Some(interest)) => registry.register(socket, self.token, interest)?,
            (Some(_), Some(interest)) => registry.reregister(socket, self.token, interest)?,
            (Some(_), None) => registry.deregister(socket)?,
            (None, None) => {}
        }
        self.registered = wanted;
        Ok(())
    }

    /// Resets the connection so it can serve another socket.
    pub(crate) fn recycle(&mut self) {
        self.close(false);
        self.inbound.recycle();
        self.outbound.recycle();
        self.token = Token(usize::MAX);
        self.peer = None;
        self.tls = None;
        self.persistent = self.persisting;
        self.readable = false;
        self.writable = false;
        self.peer_closed = false;
        self.registered = None;
        self.stranded.clear();
    }
}

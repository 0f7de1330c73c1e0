use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use futures::channel::oneshot;
use http::{Request, Response, Uri};
use mio::net::TcpStream;
use mio::{Events, Poll, Token, Waker};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::config::ConnectorConfig;
use crate::connection::{Connection, ConnectionPool, ConnectionState};
use crate::controller::ControllerHandle;
use crate::controller::registry::ConnectionRegistry;
use crate::handler::ConnectorService;
use crate::protocol::{Entity, HttpError, InboundEntity};
use crate::way::{OutboundCall, Role};

const WAKER: Token = Token(1);

/// Sends requests through a [`ClientController`], from any thread.
#[derive(Debug, Clone)]
pub struct Client {
    sender: mpsc::UnboundedSender<OutboundCall>,
    waker: Arc<Waker>,
    chunk_size: usize,
}

impl Client {
    /// Sends the request and waits for the header section of its response, the entity
    /// is then read from the response body.
    ///
    /// Requests carry an absolute URI, `http` only.
    pub async fn call(&self, request: Request<Entity>) -> Result<Response<InboundEntity>, HttpError> {
        let (responder, receiver) = oneshot::channel();
        let request = request.map(|entity| entity.detach_reader(Some(Arc::clone(&self.waker)), self.chunk_size));
        self.sender
            .send(OutboundCall { request, responder })
            .map_err(|_e| HttpError::unavailable("client controller stopped"))?;
        if let Err(e) = self.waker.wake() {
            debug!(cause = %e, "unable to wake the client controller");
        }
        receiver.await.unwrap_or(Err(HttpError::Closed))
    }
}

/// Connects to servers and drives the connections of a [`Client`] from a single thread.
#[derive(Debug)]
pub struct ClientController {
    poll: Poll,
    config: ConnectorConfig,
    connections: ConnectionRegistry,
    requests: mpsc::UnboundedReceiver<OutboundCall>,
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ClientController {
    pub fn new(config: ConnectorConfig) -> io::Result<(Self, Client)> {
        Self::with_service(config, None)
    }

    /// Creates a controller with a service notified around every request entity.
    pub fn with_service(config: ConnectorConfig, service: Option<Arc<dyn ConnectorService>>) -> io::Result<(Self, Client)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (sender, requests) = mpsc::unbounded_channel();
        let pool = ConnectionPool::new(Role::Client, &config, 0, Some(Arc::clone(&waker)), service);
        let capacity = config.max_total_connections().unwrap_or(config.pool_size());
        let chunk_size = config.outbound_buffer_size();

        let controller = Self {
            poll,
            connections: ConnectionRegistry::new(pool, capacity),
            config,
            requests,
            running: Arc::new(AtomicBool::new(true)),
            waker: Arc::clone(&waker),
        };
        Ok((controller, Client { sender, waker, chunk_size }))
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle::new(Arc::clone(&self.running), Arc::clone(&self.waker))
    }

    pub fn spawn(self) -> io::Result<JoinHandle<io::Result<()>>> {
        thread::Builder::new().name("connector-client".into()).spawn(move || self.run())
    }

    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(256);
        info!("client controller started");

        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.config.controller_sleep_time())) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.connections.close_all();
                return Err(e);
            }

            for event in &events {
                match event.token() {
                    // a call was queued or an entity got released
                    WAKER => self.connections.touch_all(),
                    token => {
                        if let Some(connection) = self.connections.get_mut(token) {
                            connection.on_ready(
                                event.is_readable() || event.is_read_closed(),
                                event.is_writable() || event.is_write_closed(),
                            );
                            self.connections.touch(token);
                        }
                    }
                }
            }

            while let Ok(call) = self.requests.try_recv() {
                self.assign(call);
            }
            loop {
                self.connections.drive(&mut vec![]);
                let stranded = self.connections.take_stranded_calls();
                if stranded.is_empty() {
                    break;
                }
                debug!(calls = stranded.len(), "reassigning calls of closing connections");
                for call in stranded {
                    self.assign(call);
                }
            }
            self.connections.maintain(self.poll.registry(), self.config.max_io_idle_time());
        }

        info!("client controller stopping");
        self.connections.close_all();
        Ok(())
    }

    /// Hands the call to the best connection for its target, opening one when allowed.
    fn assign(&mut self, call: OutboundCall) {
        let addr = match target(call.request.uri()) {
            Ok(addr) => addr,
            Err(e) => {
                let _ = call.responder.send(Err(e));
                return;
            }
        };

        if let Some(token) = self.select(addr) {
            trace!(token = ?token, peer = %addr, "request assigned to an open connection");
            if let Some(connection) = self.connections.get_mut(token) {
                connection.enqueue_request(call);
            }
            self.connections.touch(token);
            return;
        }

        if self.config.max_total_connections().is_some_and(|max| self.connections.len() >= max) {
            let _ = call.responder.send(Err(HttpError::unavailable("maximum number of connections reached")));
            return;
        }
        if self.config.max_connections_per_host().is_some_and(|max| self.connections.count_for(addr) >= max) {
            let _ = call.responder.send(Err(HttpError::unavailable(format!("maximum number of connections to {addr} reached"))));
            return;
        }

        let socket = match TcpStream::connect(addr) {
            Ok(socket) => socket,
            Err(e) => {
                let _ = call.responder.send(Err(e.into()));
                return;
            }
        };
        match self.connections.add(self.poll.registry(), socket, addr, false) {
            Ok(token) => {
                debug!(token = ?token, peer = %addr, "connecting");
                if let Some(connection) = self.connections.get_mut(token) {
                    connection.enqueue_request(call);
                }
            }
            Err(e) => {
                let _ = call.responder.send(Err(e));
            }
        }
    }

    /// An available persistent connection, else the least loaded pipelining one.
    fn select(&self, addr: SocketAddr) -> Option<Token> {
        let candidates: Vec<&Connection> = self.connections.values().filter(|connection| connection.peer() == Some(addr)).collect();

        let available = candidates.iter().find(|connection| connection.is_available() && !connection.outbound().has_queued_calls());
        if let Some(connection) = available {
            return Some(connection.token());
        }

        candidates
            .into_iter()
            .filter(|connection| {
                connection.is_pipelining()
                    && connection.is_persistent()
                    && matches!(connection.state(), ConnectionState::Opening | ConnectionState::Open)
            })
            .min_by_key(|connection| connection.load_score())
            .map(Connection::token)
    }
}

/// Resolves the address a request goes to.
fn target(uri: &Uri) -> Result<SocketAddr, HttpError> {
    match uri.scheme_str() {
        Some("http") | None => {}
        Some(scheme) => return Err(HttpError::unavailable(format!("unsupported scheme {scheme}"))),
    }
    let Some(host) = uri.host() else {
        return Err(HttpError::unavailable("request without host"));
    };
    let port = uri.port_u16().unwrap_or(80);

    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| HttpError::unavailable(format!("no address for {host}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets() {
        let addr = target(&Uri::from_static("http://127.0.0.1:9000/x")).unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse().unwrap());

        let addr = target(&Uri::from_static("http://127.0.0.1/x")).unwrap();
        assert_eq!(addr.port(), 80);

        assert!(matches!(target(&Uri::from_static("https://127.0.0.1/")), Err(HttpError::Unavailable { .. })));
        assert!(matches!(target(&Uri::from_static("/relative")), Err(HttpError::Unavailable { .. })));
    }
}

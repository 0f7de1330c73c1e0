use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Registry, Token};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionPool, Dispatch};
use crate::protocol::HttpError;
use crate::way::OutboundCall;

/// Tokens below this one are reserved by the controllers.
pub(crate) const FIRST_CONNECTION: usize = 2;

/// The open connections of a controller, keyed by their selector token.
#[derive(Debug)]
pub(crate) struct ConnectionRegistry {
    connections: HashMap<Token, Connection>,
    pool: ConnectionPool,
    next_token: usize,
    touched: Vec<Token>,
}

impl ConnectionRegistry {
    pub(crate) fn new(pool: ConnectionPool, capacity: usize) -> Self {
        Self { connections: HashMap::with_capacity(capacity), pool, next_token: FIRST_CONNECTION, touched: vec![] }
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.connections.get_mut(&token)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Number of connections to the given peer.
    pub(crate) fn count_for(&self, peer: SocketAddr) -> usize {
        self.connections.values().filter(|connection| connection.peer() == Some(peer)).count()
    }

    fn allocate_token(&mut self) -> Token {
        loop {
            let token = Token(self.next_token);
            self.next_token = self.next_token.checked_add(1).unwrap_or(FIRST_CONNECTION);
            if !self.connections.contains_key(&token) {
                return token;
            }
        }
    }

    /// Binds a pooled connection to the socket and registers it with the selector.
    pub(crate) fn add(
        &mut self,
        registry: &Registry,
        socket: TcpStream,
        peer: SocketAddr,
        open: bool,
    ) -> Result<Token, HttpError> {
        let token = self.allocate_token();
        let mut connection = self.pool.checkout(socket, token, peer);
        if open {
            connection.open();
        }

        if let Err(e) = connection.register_interest(registry) {
            connection.close(false);
            self.pool.checkin(connection);
            return Err(e.into());
        }

        self.connections.insert(token, connection);
        self.touched.push(token);
        Ok(token)
    }

    pub(crate) fn touch(&mut self, token: Token) {
        self.touched.push(token);
    }

    pub(crate) fn touch_all(&mut self) {
        self.touched.extend(self.connections.keys().copied());
    }

    /// Calls queued on connections that closed before writing them.
    pub(crate) fn take_stranded_calls(&mut self) -> Vec<OutboundCall> {
        self.connections.values_mut().flat_map(Connection::take_stranded_calls).collect()
    }

    /// Drives the connections touched since the last call.
    pub(crate) fn drive(&mut self, dispatches: &mut Vec<Dispatch>) {
        self.touched.sort_unstable();
        self.touched.dedup();
        for token in self.touched.drain(..) {
            if let Some(connection) = self.connections.get_mut(&token) {
                connection.drive(dispatches);
            }
        }
    }

    /// Applies idle timeouts, updates selector registrations and pools closed connections.
    pub(crate) fn maintain(&mut self, registry: &Registry, max_idle: Option<Duration>) {
        let now = Instant::now();
        let mut closed = vec![];

        for (token, connection) in &mut self.connections {
            if max_idle.is_some_and(|max_idle| connection.is_idle_expired(now, max_idle)) {
                debug!(token = ?token, peer = ?connection.peer(), "idle connection closed");
                connection.close(false);
            }
            if let Err(e) = connection.register_interest(registry) {
                warn!(token = ?token, cause = %e, "unable to register connection interest");
                connection.on_error(&e.into());
            }
            if connection.is_closed() {
                closed.push(*token);
            }
        }

        for token in closed {
            if let Some(connection) = self.connections.remove(&token) {
                self.pool.checkin(connection);
            }
        }
    }

    pub(crate) fn close_all(&mut self) {
        for (_, mut connection) in self.connections.drain() {
            connection.close(false);
            self.pool.checkin(connection);
        }
    }
}

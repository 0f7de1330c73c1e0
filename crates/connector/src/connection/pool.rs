use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpStream;
use mio::{Token, Waker};
use tracing::{trace, warn};

use crate::config::ConnectorConfig;
use crate::connection::Connection;
use crate::handler::ConnectorService;
use crate::way::Role;

/// Recycled connections, their buffers stay allocated between sockets.
///
/// Owned by the controller thread.
#[derive(Debug)]
pub struct ConnectionPool {
    role: Role,
    config: ConnectorConfig,
    waker: Option<Arc<Waker>>,
    service: Option<Arc<dyn ConnectorService>>,
    max_pool_size: usize,
    idle: Vec<Connection>,
}

impl ConnectionPool {
    /// Creates a pool holding `initial` connections ready for use.
    pub(crate) fn new(
        role: Role,
        config: &ConnectorConfig,
        initial: usize,
        waker: Option<Arc<Waker>>,
        service: Option<Arc<dyn ConnectorService>>,
    ) -> Self {
        let max_pool_size = config.pool_size();
        let mut pool = Self { role, config: config.clone(), waker, service, max_pool_size, idle: Vec::with_capacity(max_pool_size) };
        for _ in 0..initial.min(max_pool_size) {
            let connection = pool.create();
            pool.idle.push(connection);
        }
        pool
    }

    fn create(&self) -> Connection {
        Connection::new(self.role, &self.config, self.waker.clone(), self.service.clone())
    }

    pub fn len(&self) -> usize {
        self.idle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idle.is_empty()
    }

    /// Takes a pooled connection, or creates one, and binds it to the socket.
    pub(crate) fn checkout(&mut self, socket: TcpStream, token: Token, peer: SocketAddr) -> Connection {
        let mut connection = self.idle.pop().unwrap_or_else(|| self.create());
        connection.attach(socket, token, peer);
        connection
    }

    /// Gives a finished connection back. Busy connections are never reused.
    pub(crate) fn checkin(&mut self, mut connection: Connection) {
        if connection.is_busy() {
            warn!(token = ?connection.token(), "busy connection dropped instead of being pooled");
            return;
        }

        connection.recycle();
        if self.idle.len() < self.max_pool_size {
            self.idle.push(connection);
        } else {
            trace!("connection pool full, connection dropped");
        }
    }
}

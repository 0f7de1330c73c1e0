use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, info, trace, warn};

use crate::config::ConnectorConfig;
use crate::connection::{ConnectionPool, Dispatch};
use crate::controller::ControllerHandle;
use crate::controller::helper::Helper;
use crate::controller::registry::ConnectionRegistry;
use crate::handler::{ConnectorService, Handler};
use crate::way::Role;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

/// Accepts connections and drives them from a single thread.
///
/// ```no_run
/// use std::error::Error;
/// use http::{Request, Response};
/// use micro_connector::ConnectorConfig;
/// use micro_connector::controller::ServerController;
/// use micro_connector::handler::make_handler;
/// use micro_connector::protocol::InboundEntity;
///
/// async fn hello(_request: Request<InboundEntity>) -> Result<Response<&'static str>, Box<dyn Error + Send + Sync>> {
///     Ok(Response::new("Hello World!\r\n"))
/// }
///
/// let addr = "127.0.0.1:8080".parse().unwrap();
/// let controller = ServerController::bind(addr, ConnectorConfig::default(), make_handler(hello)).unwrap();
/// controller.run().unwrap();
/// ```
#[derive(Debug)]
pub struct ServerController<H> {
    poll: Poll,
    listener: TcpListener,
    config: ConnectorConfig,
    helper: Helper<H>,
    connections: ConnectionRegistry,
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
    service: Option<Arc<dyn ConnectorService>>,
    /// The listener has connections left to accept.
    accept_pending: bool,
    dispatches: Vec<Dispatch>,
}

impl<H> ServerController<H>
where
    H: Handler + 'static,
{
    pub fn bind(addr: SocketAddr, config: ConnectorConfig, handler: H) -> io::Result<Self> {
        Self::bind_with_service(addr, config, handler, None)
    }

    /// Binds with a service notified around every response entity, which also describes
    /// the TLS session of accepted connections.
    pub fn bind_with_service(
        addr: SocketAddr,
        config: ConnectorConfig,
        handler: H,
        service: Option<Arc<dyn ConnectorService>>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let running = Arc::new(AtomicBool::new(true));
        let helper = Helper::new(&config, handler, Arc::clone(&running), Arc::clone(&waker))?;
        let pool = ConnectionPool::new(Role::Server, &config, config.pool_size(), Some(Arc::clone(&waker)), service.as_ref().map(Arc::clone));
        let capacity = config.max_total_connections().unwrap_or(config.pool_size());

        Ok(Self {
            poll,
            listener,
            config,
            helper,
            connections: ConnectionRegistry::new(pool, capacity),
            running,
            waker,
            service,
            accept_pending: false,
            dispatches: vec![],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle able to stop the controller from another thread.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle::new(Arc::clone(&self.running), Arc::clone(&self.waker))
    }

    /// Runs the controller on a dedicated thread.
    pub fn spawn(self) -> io::Result<JoinHandle<io::Result<()>>> {
        thread::Builder::new().name("connector-controller".into()).spawn(move || self.run())
    }

    /// Runs the event loop on the current thread until shut down.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        info!(addr = ?self.listener.local_addr().ok(), "server controller started");

        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.config.controller_sleep_time())) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.stop();
                return Err(e);
            }

            for event in &events {
                match event.token() {
                    LISTENER => self.accept_pending = true,
                    // an entity got released or a response committed
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

            if self.accept_pending {
                self.accept();
            }
            self.process();
            self.connections.maintain(self.poll.registry(), self.config.max_io_idle_time());
        }

        self.stop();
        Ok(())
    }

    /// Accepts sockets until the listener would block or the helper is overloaded.
    fn accept(&mut self) {
        loop {
            if self.helper.is_overloaded() {
                debug!("overloaded, accepting later");
                return;
            }

            match self.listener.accept() {
                Ok((socket, peer)) => {
                    if self.config.max_total_connections().is_some_and(|max| self.connections.len() >= max) {
                        info!(peer = %peer, "maximum number of connections reached, connection refused");
                        drop(socket);
                        continue;
                    }
                    match self.connections.add(self.poll.registry(), socket, peer, true) {
                        Ok(token) => {
                            debug!(peer = %peer, token = ?token, "connection accepted");
                            self.attach_tls(token, peer);
                        }
                        Err(e) => warn!(peer = %peer, cause = %e, "unable to register accepted connection"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.accept_pending = false;
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    return;
                }
            }
        }
    }

    fn attach_tls(&mut self, token: Token, peer: SocketAddr) {
        let Some(tls) = self.service.as_ref().and_then(|service| service.tls_info(peer)) else { return };
        trace!(token = ?token, cipher_suite = tls.cipher_suite(), "tls session attached");
        if let Some(connection) = self.connections.get_mut(token) {
            connection.set_tls(tls);
        }
    }

    /// Moves committed responses out and requests in until nothing is left to do.
    fn process(&mut self) {
        loop {
            self.helper.handle_outbound(&mut self.connections);
            self.connections.drive(&mut self.dispatches);
            if self.dispatches.is_empty() {
                return;
            }
            self.helper.handle_inbound(self.dispatches.drain(..));
        }
    }

    fn stop(&mut self) {
        info!("server controller stopping");
        self.helper.shutdown();
        self.connections.close_all();
        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            debug!(cause = %e, "unable to deregister the listener");
        }
    }
}

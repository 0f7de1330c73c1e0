//! The server side helper: worker pool, message queues and flags.
//!
//! Requests read by the controller are queued as [`Dispatch`]es and handed to the worker
//! runtime by [`Helper::handle_inbound`]. Handlers answer through a [`ResponseCommitter`]
//! from any thread, in any order; [`Helper::handle_outbound`] moves the responses back
//! into their connection's outbound way on the controller thread.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::{fmt, io};

use futures::FutureExt;
use futures::executor::block_on;
use http::{Request, Response, StatusCode};
use mio::{Token, Waker};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::ConnectorConfig;
use crate::connection::Dispatch;
use crate::controller::registry::ConnectionRegistry;
use crate::handler::Handler;
use crate::protocol::{Entity, InboundEntity};

type Committed = (Token, u64, Response<Entity>);

/// Sends the response to one request back to its connection.
#[derive(Clone)]
pub struct ResponseCommitter {
    token: Token,
    seq: u64,
    sender: mpsc::UnboundedSender<Committed>,
    waker: Arc<Waker>,
    chunk_size: usize,
}

impl fmt::Debug for ResponseCommitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCommitter").field("token", &self.token).field("seq", &self.seq).finish_non_exhaustive()
    }
}

impl ResponseCommitter {
    /// Queues the response and wakes the controller, `false` once the controller is gone.
    ///
    /// A reader entity is moved off the controller thread first, see [`Entity::reader`].
    pub fn commit(&self, response: Response<Entity>) -> bool {
        let response = response.map(|entity| entity.detach_reader(Some(Arc::clone(&self.waker)), self.chunk_size));
        if self.sender.send((self.token, self.seq, response)).is_err() {
            return false;
        }
        if let Err(e) = self.waker.wake() {
            debug!(cause = %e, "unable to wake the controller");
        }
        true
    }
}

pub struct Helper<H> {
    config: ConnectorConfig,
    handler: Arc<H>,
    runtime: Option<Runtime>,
    running: Arc<AtomicBool>,
    overloaded: AtomicBool,
    active: Arc<AtomicUsize>,
    sender: mpsc::UnboundedSender<Committed>,
    receiver: mpsc::UnboundedReceiver<Committed>,
    waker: Arc<Waker>,
}

impl<H> fmt::Debug for Helper<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Helper")
            .field("running", &self.running)
            .field("overloaded", &self.overloaded)
            .field("active", &self.active)
            .field("workers", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl<H> Helper<H>
where
    H: Handler + 'static,
{
    pub(crate) fn new(config: &ConnectorConfig, handler: H, running: Arc<AtomicBool>, waker: Arc<Waker>) -> io::Result<Self> {
        let runtime = if config.worker_threads() {
            let runtime = Builder::new_multi_thread()
                .worker_threads(config.min_threads().max(1))
                .max_blocking_threads(config.max_threads())
                .thread_name("connector-worker")
                .enable_all()
                .build()?;
            Some(runtime)
        } else {
            None
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            config: config.clone(),
            handler: Arc::new(handler),
            runtime,
            running,
            overloaded: AtomicBool::new(false),
            active: Arc::new(AtomicUsize::new(0)),
            sender,
            receiver,
            waker,
        })
    }

    /// Whether as many requests as allowed are being handled.
    pub fn is_overloaded(&self) -> bool {
        let overloaded = self.active.load(Ordering::Acquire) >= self.config.max_threads();
        self.overloaded.store(overloaded, Ordering::Release);
        overloaded
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn committer(&self, token: Token, seq: u64) -> ResponseCommitter {
        ResponseCommitter {
            token,
            seq,
            sender: self.sender.clone(),
            waker: Arc::clone(&self.waker),
            chunk_size: self.config.outbound_buffer_size(),
        }
    }

    /// Hands the queued requests to the handler.
    pub(crate) fn handle_inbound(&self, dispatches: impl IntoIterator<Item = Dispatch>) {
        for Dispatch { token, seq, request } in dispatches {
            let committer = self.committer(token, seq);

            if !self.is_running() {
                warn!(token = ?token, seq, "controller not running, request not handled");
                committer.commit(status_response(StatusCode::SERVICE_UNAVAILABLE));
                continue;
            }

            if !self.config.worker_threads() {
                let response = block_on(respond(&*self.handler, request));
                committer.commit(response);
                continue;
            }

            if self.is_overloaded() {
                warn!(token = ?token, seq, "overloaded, request not handled");
                committer.commit(status_response(StatusCode::SERVICE_UNAVAILABLE));
                continue;
            }

            let Some(runtime) = self.runtime.as_ref() else {
                warn!(token = ?token, seq, "worker service shut down, request not handled");
                committer.commit(status_response(StatusCode::SERVICE_UNAVAILABLE));
                continue;
            };

            self.active.fetch_add(1, Ordering::AcqRel);
            let handler = Arc::clone(&self.handler);
            let active = Arc::clone(&self.active);
            runtime.spawn(async move {
                let response = respond(&*handler, request).await;
                active.fetch_sub(1, Ordering::AcqRel);
                if !committer.commit(response) {
                    debug!(seq, "controller gone, response dropped");
                }
            });
        }
    }

    /// Moves committed responses into their connections, touching them for the next drive.
    pub(crate) fn handle_outbound(&mut self, connections: &mut ConnectionRegistry) -> bool {
        let mut any = false;
        while let Ok((token, seq, response)) = self.receiver.try_recv() {
            any = true;
            let committed = connections.get_mut(token).is_some_and(|connection| connection.commit_response(seq, response));
            if committed {
                connections.touch(token);
            } else {
                debug!(token = ?token, seq, "connection gone, response dropped");
            }
        }
        any
    }

    /// Stops the workers without waiting for the requests they handle.
    pub(crate) fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn respond<H: Handler>(handler: &H, request: Request<InboundEntity>) -> Response<Entity> {
    match AssertUnwindSafe(handler.call(request)).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            let e: Box<dyn std::error::Error + Send + Sync> = e.into();
            error!(cause = %e, "handle request error");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(_panic) => {
            error!("handler panicked");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub(crate) fn status_response(status: StatusCode) -> Response<Entity> {
    let mut response = Response::new(Entity::empty());
    *response.status_mut() = status;
    response
}

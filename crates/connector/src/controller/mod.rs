//! Controllers: the single thread event loops owning the connections.
//!
//! A controller owns a `mio` [`Poll`](mio::Poll), every connection registered with it
//! and, on the server side, a [`Helper`] dispatching requests to the handler. Connections
//! are only ever touched from the controller thread; other threads talk to it through
//! queues and a [`Waker`].
//!
//! - [`ServerController`]: accepts connections and answers requests through a handler
//! - [`ClientController`]: connects to servers and sends the requests of a [`Client`]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mio::Waker;
use tracing::debug;

mod client;
mod helper;
mod registry;
mod server;

pub use client::{Client, ClientController};
pub use helper::{Helper, ResponseCommitter};
pub use server::ServerController;

/// Stops a running controller from any thread.
#[derive(Clone)]
pub struct ControllerHandle {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ControllerHandle {
    pub(crate) fn new(running: Arc<AtomicBool>, waker: Arc<Waker>) -> Self {
        Self { running, waker }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the controller to stop, it closes its connections before `run` returns.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            debug!(cause = %e, "unable to wake the controller");
        }
    }
}

impl fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHandle").field("running", &self.is_running()).finish_non_exhaustive()
    }
}

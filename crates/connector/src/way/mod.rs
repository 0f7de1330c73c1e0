//! Ways: one direction of traffic on a connection.
//!
//! Each connection owns exactly one [`InboundWay`] and one [`OutboundWay`] for its whole
//! life. A way owns a fixed size [`Buffer`](crate::codec::Buffer), the state of the message
//! being read or written and a FIFO of pending messages. What differs between clients and
//! servers (which start line is read, which one is written, how completion is handled) is
//! selected from a [`Role`] rather than by specializing the ways.
//!
//! Ways never touch the selector: they report what they want through their [`IoState`]
//! and the connection turns that into a registration.

use std::io::{self, Write};

use tracing::debug;

mod inbound;
mod outbound;

pub use inbound::InboundWay;
pub use outbound::OutboundWay;

pub(crate) use inbound::{InboundEvent, PendingCall, ReadOutcome};
pub(crate) use outbound::{OutboundCall, OutboundEvent, Slot, StartPolicy, WriteOutcome};

/// Which end of the exchange the connection plays.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Writes requests, reads responses.
    Client,
    /// Reads requests, writes responses.
    Server,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Whether a way currently wants the selector's attention.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum IoState {
    #[default]
    Idle,
    ReadInterest,
    WriteInterest,
}

/// Phase of the message currently read or written.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MessageState {
    #[default]
    None,
    StartLine,
    Headers,
    Body,
    End,
}

/// Echoes exchanged bytes to the standard output when tracing is enabled.
pub(crate) fn echo(direction: Direction, bytes: &[u8]) {
    let mut stdout = io::stdout().lock();
    if let Err(e) = stdout.write_all(bytes).and_then(|()| stdout.flush()) {
        debug!(?direction, cause = %e, "unable to echo traced bytes");
    }
}

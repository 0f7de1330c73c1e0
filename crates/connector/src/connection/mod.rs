//! Connections and their pool.
//!
//! - [`Connection`]: one socket with exactly one inbound and one outbound way, its
//!   lifecycle ([`ConnectionState`]), persistence and pipelining, and TLS introspection
//! - [`ConnectionPool`]: recycled connections, reused with their buffers
//! - [`TlsInfo`]: what a TLS front end negotiated

#[allow(clippy::module_inception, reason = "the connection type lives next to its pool")]
mod connection;
mod pool;
mod tls;

pub use connection::Connection;
pub use connection::ConnectionState;
pub(crate) use connection::Dispatch;
pub use pool::ConnectionPool;
pub use tls::TlsInfo;

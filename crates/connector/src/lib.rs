//! A non-blocking micro HTTP/1.x connector
//!
//! This crate moves HTTP/1.0 and HTTP/1.1 messages between sockets and application code,
//! on the server side (accepting connections, reading requests, writing responses) and on
//! the client side (connecting, writing requests, reading responses). Every socket is
//! driven by a single controller thread built on `mio`; application handlers run on a
//! worker pool and answer in any order.
//!
//! # Features
//!
//! - HTTP/1.0 and HTTP/1.1 framing: content length, chunked and close delimited entities
//! - Persistent connections and request pipelining, responses always written in order
//! - Expect-continue and informational responses
//! - Streaming entities in both directions with bounded buffers, reading stops while an
//!   inbound entity is not consumed
//! - Admission control on the number of connections and of in-flight requests
//! - Connection recycling through a pool
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use http::{Request, Response, StatusCode};
//! use tracing::{info, Level};
//! use tracing_subscriber::FmtSubscriber;
//! use micro_connector::ConnectorConfig;
//! use micro_connector::controller::ServerController;
//! use micro_connector::handler::make_handler;
//! use micro_connector::protocol::InboundEntity;
//!
//! async fn hello_world(mut request: Request<InboundEntity>) -> Result<Response<String>, Box<dyn Error + Send + Sync>> {
//!     let body = request.body_mut().text().await?;
//!     info!(path = request.uri().path(), body = %body, "receiving request");
//!
//!     let response = Response::builder()
//!         .status(StatusCode::OK)
//!         .body("Hello World!\r\n".to_string())?;
//!     Ok(response)
//! }
//!
//! fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     let config = ConnectorConfig::builder().pipelining_connections(true).build().unwrap();
//!     let addr = "127.0.0.1:8080".parse().unwrap();
//!     let controller = ServerController::bind(addr, config, make_handler(hello_world)).unwrap();
//!     controller.run().unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! - [`controller`]: the event loops, the request dispatching helper and the client
//! - [`connection`]: one socket, its state machine and the pool recycling it
//! - [`way`]: one direction of a connection, reading or writing messages
//! - [`codec`]: line, start line and entity framing codecs
//! - [`protocol`]: message heads, entities and errors
//! - [`handler`]: application entry points
//! - [`config`]: the [`ConnectorConfig`] shared by all of the above
//!
//! ## Threads
//!
//! Connections are only touched from their controller thread. Handlers answer through a
//! [`controller::ResponseCommitter`], which queues the response and wakes the controller;
//! inbound entities wake it again once consumed so the next pipelined request can be read.
//! Reader based outbound entities are pulled on the worker runtime's blocking pool (or a
//! thread of their own) and wake the controller for every chunk.
//!
//! ## Error Handling
//!
//! - [`protocol::HttpError`]: top-level error type, classified by [`protocol::ErrorKind`]
//! - [`protocol::ParseError`]: malformed input, fatal to the connection
//! - [`protocol::SendError`]: failures while writing an entity
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - No TLS handshakes, a front end describes its sessions through
//!   [`handler::ConnectorService::tls_info`] and requests carry them as extensions
//! - With workers disabled, inbound entities are buffered in full before the handler runs

pub mod codec;
pub mod config;
pub mod connection;
pub mod controller;
pub mod handler;
pub mod protocol;
pub mod way;

mod utils;
pub(crate) use utils::ensure;

pub use config::ConnectorConfig;

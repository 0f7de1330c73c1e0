//! Application entry points.
//!
//! A [`Handler`] turns a request into a response on a worker thread (or on the controller
//! thread when workers are disabled). [`ConnectorService`] is notified around the sending
//! of every outbound entity, and tells accepted connections what a TLS front end negotiated
//! for them.

use std::error::Error;
use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use http::{Request, Response};

use crate::connection::TlsInfo;
use crate::protocol::{Entity, InboundEntity};

#[async_trait]
pub trait Handler: Send + Sync {
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, req: Request<InboundEntity>) -> Result<Response<Entity>, Self::Error>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<RespBody, Err, F, Fut> Handler for HandlerFn<F>
where
    RespBody: Into<Entity> + Send,
    F: Fn(Request<InboundEntity>) -> Fut + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>> + Send,
    Fut: Future<Output = Result<Response<RespBody>, Err>> + Send,
{
    type Error = Err;

    async fn call(&self, req: Request<InboundEntity>) -> Result<Response<Entity>, Self::Error> {
        (self.f)(req).await.map(|response| response.map(Into::into))
    }
}

pub fn make_handler<F, RespBody, Err, Ret>(f: F) -> HandlerFn<F>
where
    RespBody: Into<Entity>,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Ret: Future<Output = Result<Response<RespBody>, Err>>,
    F: Fn(Request<InboundEntity>) -> Ret,
{
    HandlerFn { f }
}

/// Hooks bracketing the sending of an outbound entity, called on the controller thread.
pub trait ConnectorService: Send + Sync {
    fn before_send(&self, _entity: &Entity) {}

    fn after_send(&self, _entity: &Entity) {}

    /// The TLS session of a connection just accepted from `peer`, `None` for plain sockets.
    ///
    /// Requests read from the connection carry it as a [`TlsInfo`] extension.
    fn tls_info(&self, _peer: SocketAddr) -> Option<TlsInfo> {
        None
    }
}

impl fmt::Debug for dyn ConnectorService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectorService")
    }
}

//! Message entities.
//!
//! The engine never interprets payload bytes beyond framing. It only needs a narrow view of
//! a representation ([`Representation`]): its size, its media type and a way to release it.
//!
//! - [`InboundEntity`]: an entity being received. The inbound way decodes the framing on
//!   the controller thread and forwards the data through a bounded channel; consumers read
//!   it as an `http_body::Body` or through [`InboundEntity::text`] / [`InboundEntity::write_to`].
//!   Releasing it (explicitly or by dropping it) frees the inbound way for the next
//!   pipelined message.
//! - [`Entity`]: an entity to send, either in memory or pulled from a reader.
//!
//! Both channels hold at most a few chunks. A full channel pauses its producer, which is
//! woken again once the other side takes a chunk.

use std::fmt;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{self, Context, Poll, Wake, ready};
use std::thread;

use bytes::{Bytes, BytesMut};
use futures::channel::mpsc;
use futures::executor::block_on;
use futures::{SinkExt, Stream, StreamExt};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use mime::Mime;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Chunks an entity channel holds before its producer has to wait.
const ENTITY_CHANNEL_CAPACITY: usize = 2;

/// The narrow surface of a representation the engine relies on.
pub trait Representation {
    /// Size in bytes when known up front.
    fn size(&self) -> Option<u64>;

    fn media_type(&self) -> Option<&Mime>;

    /// Whether there is anything to transfer at all.
    fn is_available(&self) -> bool;

    /// Gives up the underlying content. Idempotent.
    fn release(&mut self);
}

fn wake_controller(waker: Option<&mio::Waker>) {
    if let Some(waker) = waker {
        // the controller also polls with a timeout, a lost wake up only adds latency
        let _ = waker.wake();
    }
}

/// Task side wake up of a controller, registered with the entity channels.
struct ControllerWake(Option<Arc<mio::Waker>>);

impl Wake for ControllerWake {
    fn wake(self: Arc<Self>) {
        wake_controller(self.0.as_deref());
    }

    fn wake_by_ref(self: &Arc<Self>) {
        wake_controller(self.0.as_deref());
    }
}

/// Clears the busy flag of the inbound way that produced an entity, then wakes the
/// controller so the next message can be read.
pub(crate) struct ReleaseHandle {
    busy: Arc<AtomicBool>,
    waker: Option<Arc<mio::Waker>>,
}

impl ReleaseHandle {
    pub(crate) fn new(busy: Arc<AtomicBool>, waker: Option<Arc<mio::Waker>>) -> Self {
        busy.store(true, Ordering::Release);
        Self { busy, waker }
    }

    fn task_waker(&self) -> task::Waker {
        task::Waker::from(Arc::new(ControllerWake(self.waker.clone())))
    }

    fn release(self) {
        self.busy.store(false, Ordering::Release);
        wake_controller(self.waker.as_deref());
    }
}

#[derive(Debug)]
enum Feed {
    Bounded { sender: mpsc::Sender<PayloadItem>, waker: task::Waker },
    /// Synchronous handling only sees a request once its entity is complete.
    Unbounded(mpsc::UnboundedSender<PayloadItem>),
}

/// What became of an item handed to an [`EntitySender`].
#[derive(Debug)]
pub(crate) enum Forwarded {
    Sent,
    /// The consumer is behind. The item is handed back, the controller is woken once a
    /// chunk has been taken.
    Full(PayloadItem),
    /// The entity was released, nobody reads it anymore.
    Released,
}

/// Producer side of an [`InboundEntity`], owned by the inbound way.
#[derive(Debug)]
pub(crate) struct EntitySender {
    feed: Feed,
}

impl EntitySender {
    pub(crate) fn send(&mut self, item: PayloadItem) -> Forwarded {
        let (sender, waker) = match &mut self.feed {
            Feed::Unbounded(sender) => {
                return if sender.unbounded_send(item).is_ok() { Forwarded::Sent } else { Forwarded::Released };
            }
            Feed::Bounded { sender, waker } => (sender, waker),
        };

        let mut item = item;
        loop {
            match sender.try_send(item) {
                Ok(()) => return Forwarded::Sent,
                Err(e) if e.is_disconnected() => return Forwarded::Released,
                Err(e) => item = e.into_inner(),
            }
            // parks the controller waker until the consumer takes a chunk
            match sender.poll_ready(&mut Context::from_waker(waker)) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(_e)) => return Forwarded::Released,
                Poll::Pending => return Forwarded::Full(item),
            }
        }
    }
}

type Source = Pin<Box<dyn Stream<Item = PayloadItem> + Send + Sync>>;

/// An entity being received.
pub struct InboundEntity {
    payload_size: PayloadSize,
    media_type: Option<Mime>,
    receiver: Option<Source>,
    release: Option<ReleaseHandle>,
}

impl InboundEntity {
    /// The empty entity: nothing follows the header section.
    pub fn empty() -> Self {
        Self { payload_size: PayloadSize::Empty, media_type: None, receiver: None, release: None }
    }

    /// A bounded channel unless the whole entity has to be read before anyone consumes it.
    pub(crate) fn channel(
        payload_size: PayloadSize,
        headers: &HeaderMap,
        release: ReleaseHandle,
        bounded: bool,
    ) -> (EntitySender, Self) {
        let (feed, receiver) = if bounded {
            let (sender, receiver) = mpsc::channel(ENTITY_CHANNEL_CAPACITY);
            let receiver: Source = Box::pin(receiver);
            (Feed::Bounded { sender, waker: release.task_waker() }, receiver)
        } else {
            let (sender, receiver) = mpsc::unbounded();
            let receiver: Source = Box::pin(receiver);
            (Feed::Unbounded(sender), receiver)
        };
        let entity = Self { payload_size, media_type: media_type(headers), receiver: Some(receiver), release: Some(release) };
        (EntitySender { feed }, entity)
    }

    /// How the entity is delimited on the wire.
    pub fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }

    /// Whether this is the empty entity marker.
    pub fn is_empty(&self) -> bool {
        self.payload_size.is_empty()
    }

    /// Collects the whole entity, then releases it.
    pub async fn to_bytes(&mut self) -> Result<Bytes, ParseError> {
        let mut buf = BytesMut::new();
        while let Some(frame) = self.frame().await {
            if let Ok(data) = frame?.into_data() {
                buf.extend_from_slice(&data);
            }
        }
        Ok(buf.freeze())
    }

    /// Collects the whole entity as UTF-8 text, then releases it.
    pub async fn text(&mut self) -> Result<String, ParseError> {
        let bytes = self.to_bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(ParseError::invalid_body)
    }

    /// Copies the entity into the writer, then releases it.
    pub async fn write_to<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<u64, ParseError> {
        let mut written = 0u64;
        while let Some(frame) = self.frame().await {
            if let Ok(data) = frame?.into_data() {
                writer.write_all(&data).await?;
                written += data.len() as u64;
            }
        }
        writer.flush().await?;
        Ok(written)
    }

    fn finish(&mut self) {
        self.receiver.take();
        if let Some(release) = self.release.take() {
            trace!("inbound entity released");
            release.release();
        }
    }
}

impl Representation for InboundEntity {
    fn size(&self) -> Option<u64> {
        self.payload_size.exact()
    }

    fn media_type(&self) -> Option<&Mime> {
        self.media_type.as_ref()
    }

    fn is_available(&self) -> bool {
        self.receiver.is_some()
    }

    fn release(&mut self) {
        self.finish();
    }
}

impl Drop for InboundEntity {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for InboundEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundEntity")
            .field("payload_size", &self.payload_size)
            .field("media_type", &self.media_type)
            .field("available", &self.receiver.is_some())
            .finish()
    }
}

impl Body for InboundEntity {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(receiver.poll_next_unpin(cx)) {
            Some(PayloadItem::Chunk(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
            Some(PayloadItem::Eof) => {
                self.finish();
                Poll::Ready(None)
            }
            None => {
                self.finish();
                Poll::Ready(Some(Err(ParseError::UnexpectedEof)))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.receiver.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match self.payload_size.exact() {
            Some(n) => SizeHint::with_exact(n),
            None => SizeHint::default(),
        }
    }
}

fn media_type(headers: &HeaderMap) -> Option<Mime> {
    headers.get(http::header::CONTENT_TYPE)?.to_str().ok()?.parse().ok()
}

enum EntityKind {
    Empty,
    Full(Bytes),
    Reader { reader: Box<dyn Read + Send>, size: Option<u64> },
    /// A reader pulled on a blocking thread, its chunks wait in a bounded channel.
    Detached { receiver: mpsc::Receiver<io::Result<Bytes>>, partial: Bytes, size: Option<u64> },
}

/// What the outbound way gets when it asks an entity for data.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Chunk {
    Data(Bytes),
    /// Nothing yet, the controller is woken when the next chunk arrives.
    Pending,
    End,
}

/// An entity to send.
///
/// When its size is unknown it is sent with chunked transfer encoding. Reader based
/// entities are pulled on a blocking thread once committed, never on the controller
/// thread, see [`Entity::reader`].
pub struct Entity {
    kind: EntityKind,
    media_type: Option<Mime>,
}

impl Entity {
    pub fn empty() -> Self {
        Self { kind: EntityKind::Empty, media_type: None }
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let kind = if bytes.is_empty() { EntityKind::Empty } else { EntityKind::Full(bytes) };
        Self { kind, media_type: None }
    }

    /// An entity pulled from a blocking reader. The reader runs on the worker runtime's
    /// blocking pool, or on a thread of its own outside of it, and stays at most a few
    /// chunks ahead of the socket.
    pub fn reader<R: Read + Send + 'static>(reader: R, size: Option<u64>) -> Self {
        Self { kind: EntityKind::Reader { reader: Box::new(reader), size }, media_type: None }
    }

    #[must_use]
    pub fn with_media_type(mut self, media_type: Mime) -> Self {
        self.media_type = Some(media_type);
        self
    }

    /// Moves the pulling of a reader based entity off the calling thread, each chunk read
    /// wakes the controller. Other entities are returned as they are.
    pub(crate) fn detach_reader(self, waker: Option<Arc<mio::Waker>>, chunk_size: usize) -> Self {
        let media_type = self.media_type;
        let (reader, size) = match self.kind {
            EntityKind::Reader { reader, size } => (reader, size),
            kind => return Self { kind, media_type },
        };

        let (sender, mut receiver) = mpsc::channel(ENTITY_CHANNEL_CAPACITY);
        let job = move || pump(reader, sender, waker, chunk_size.max(1));
        let spawned = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                drop(runtime.spawn_blocking(job));
                Ok(())
            }
            Err(_e) => thread::Builder::new().name("connector-entity".into()).spawn(job).map(drop),
        };
        if let Err(e) = spawned {
            warn!(cause = %e, "unable to start the entity reader");
            let (mut failed, unread) = mpsc::channel(1);
            let _ = failed.try_send(Err(e));
            receiver = unread;
        }

        Self { kind: EntityKind::Detached { receiver, partial: Bytes::new(), size }, media_type }
    }

    /// Takes at most `max` bytes.
    pub(crate) fn read_chunk(&mut self, max: usize) -> io::Result<Chunk> {
        match &mut self.kind {
            EntityKind::Empty => Ok(Chunk::End),
            EntityKind::Full(bytes) if bytes.is_empty() => Ok(Chunk::End),
            EntityKind::Full(bytes) => {
                let len = max.min(bytes.len());
                Ok(Chunk::Data(bytes.split_to(len)))
            }
            EntityKind::Reader { reader, .. } => Ok(read_some(reader.as_mut(), max)?.map_or(Chunk::End, Chunk::Data)),
            EntityKind::Detached { receiver, partial, .. } => {
                if partial.is_empty() {
                    match receiver.try_next() {
                        Ok(Some(Ok(bytes))) => *partial = bytes,
                        Ok(Some(Err(e))) => return Err(e),
                        Ok(None) => return Ok(Chunk::End),
                        Err(_e) => return Ok(Chunk::Pending),
                    }
                }
                let len = max.min(partial.len());
                Ok(Chunk::Data(partial.split_to(len)))
            }
        }
    }
}

/// Reads at most `max` bytes, `None` at the end of the reader.
fn read_some(reader: &mut dyn Read, max: usize) -> io::Result<Option<Bytes>> {
    let mut buf = vec![0u8; max];
    let n = loop {
        match reader.read(&mut buf) {
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    };
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(Bytes::from(buf)))
}

/// Copies the reader into the channel until its end, a read error or the entity is dropped.
fn pump(
    mut reader: Box<dyn Read + Send>,
    mut sender: mpsc::Sender<io::Result<Bytes>>,
    waker: Option<Arc<mio::Waker>>,
    chunk_size: usize,
) {
    loop {
        let item = match read_some(reader.as_mut(), chunk_size) {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => break,
            Err(e) => Err(e),
        };
        let failed = item.is_err();
        if block_on(sender.send(item)).is_err() {
            trace!("outbound entity dropped before its end");
            return;
        }
        wake_controller(waker.as_deref());
        if failed {
            return;
        }
    }
    // the controller sees the end once the sender is gone
    drop(sender);
    wake_controller(waker.as_deref());
}

impl Representation for Entity {
    fn size(&self) -> Option<u64> {
        match &self.kind {
            EntityKind::Empty => Some(0),
            EntityKind::Full(bytes) => Some(bytes.len() as u64),
            EntityKind::Reader { size, .. } | EntityKind::Detached { size, .. } => *size,
        }
    }

    fn media_type(&self) -> Option<&Mime> {
        self.media_type.as_ref()
    }

    fn is_available(&self) -> bool {
        self.size() != Some(0)
    }

    fn release(&mut self) {
        self.kind = EntityKind::Empty;
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            EntityKind::Empty => "empty",
            EntityKind::Full(_) => "full",
            EntityKind::Reader { .. } => "reader",
            EntityKind::Detached { .. } => "detached reader",
        };
        f.debug_struct("Entity").field("kind", &kind).field("size", &self.size()).field("media_type", &self.media_type).finish()
    }
}

impl From<Bytes> for Entity {
    fn from(bytes: Bytes) -> Self {
        Self::full(bytes)
    }
}

impl From<&'static str> for Entity {
    fn from(str: &'static str) -> Self {
        Self::full(Bytes::from_static(str.as_bytes()))
    }
}

impl From<String> for Entity {
    fn from(str: String) -> Self {
        Self::full(Bytes::from(str))
    }
}

impl From<Vec<u8>> for Entity {
    fn from(vec: Vec<u8>) -> Self {
        Self::full(Bytes::from(vec))
    }
}

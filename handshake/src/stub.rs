//! The handshaker stub and its stream-facing surfaces.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use chassis_core::Status;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

/// Deadline applied to the handshake RPC when the stream is opened.
pub const HANDSHAKE_RPC_DEADLINE: Duration = Duration::from_secs(20);

/// One complete handshaker request frame. Payload bytes are opaque to the
/// stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest(pub Bytes);

/// One complete handshaker response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse(pub Bytes);

/// Terminal and per-send failures of the stub.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandshakeError {
    /// A response arrived while one was already buffered, or `send` found
    /// the previous response unread.
    #[error("received an unexpected response")]
    UnexpectedResponse,
    /// The stream failed with a terminating status.
    #[error("received a terminating error: {0}")]
    Terminated(Status),
    /// The server closed the response stream.
    #[error("response stream closed")]
    StreamClosed,
    /// The stream ended without a response and without a latched error.
    #[error("no handshaker response received")]
    NoResponse,
}

/// Writer half of the handshaker stream, provided by the transport.
pub trait StreamWriter: Send {
    /// Write one request frame onto the stream.
    fn write(&mut self, req: HandshakeRequest) -> Result<(), Status>;

    /// Half-close the stream. Must tolerate repeated calls.
    fn half_close(&mut self);
}

/// Opens the bidirectional handshaker stream on demand.
pub trait HandshakerChannel: Send + Sync {
    /// Open the stream with `deadline` applied to the RPC, wiring `reader`
    /// to receive inbound frames and terminal events.
    fn open(
        &self,
        deadline: Duration,
        reader: ResponseReader,
    ) -> Result<Box<dyn StreamWriter>, Status>;
}

struct Inner {
    /// Capacity-1 rendezvous between the reader thread and a blocked
    /// `send`. `None` is the sentinel that unblocks a waiter after a
    /// terminal event.
    slot_tx: Sender<Option<HandshakeResponse>>,
    slot_rx: Receiver<Option<HandshakeResponse>>,
    /// Only the first terminal transition latches.
    terminal: OnceLock<HandshakeError>,
    writer: Mutex<Option<Box<dyn StreamWriter>>>,
}

impl Inner {
    fn half_close_writer(&self) {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.half_close();
        }
    }
}

/// Receiver half handed to the transport delivering inbound frames. All
/// methods are safe to call from the transport's reader thread while a
/// `send` is blocked.
#[derive(Clone)]
pub struct ResponseReader {
    inner: Arc<Inner>,
}

impl ResponseReader {
    /// Deliver one response frame from the server.
    pub fn on_next(&self, resp: HandshakeResponse) {
        if self.inner.slot_tx.try_send(Some(resp)).is_err() {
            // The slot was still full: protocol violation.
            let _ = self
                .inner
                .terminal
                .set(HandshakeError::UnexpectedResponse);
            tracing::warn!("handshaker delivered a response with one already buffered");
            self.inner.half_close_writer();
        }
    }

    /// The stream failed with `status`.
    pub fn on_error(&self, status: Status) {
        tracing::debug!(%status, "handshaker stream failed");
        let _ = self
            .inner
            .terminal
            .set(HandshakeError::Terminated(status));
        let _ = self.inner.slot_tx.try_send(None);
    }

    /// The server closed the response stream.
    pub fn on_completed(&self) {
        tracing::debug!("handshaker response stream closed");
        let _ = self.inner.terminal.set(HandshakeError::StreamClosed);
        let _ = self.inner.slot_tx.try_send(None);
    }
}

/// Serialises one-request-one-response exchanges over the handshaker
/// stream. Callers invoke [`send`](Self::send) serially; the transport's
/// reader thread feeds the [`ResponseReader`] concurrently.
pub struct HandshakerStub {
    channel: Arc<dyn HandshakerChannel>,
    inner: Arc<Inner>,
}

impl HandshakerStub {
    pub fn new(channel: Arc<dyn HandshakerChannel>) -> Self {
        let (slot_tx, slot_rx) = bounded(1);
        Self {
            channel,
            inner: Arc::new(Inner {
                slot_tx,
                slot_rx,
                terminal: OnceLock::new(),
                writer: Mutex::new(None),
            }),
        }
    }

    /// Handle for the transport to deliver inbound frames on.
    pub fn reader(&self) -> ResponseReader {
        ResponseReader {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Send one request and block until its response arrives.
    ///
    /// Fails without writing when a terminal error is latched or the
    /// previous response is still unread. The stream is opened lazily on
    /// the first send, with [`HANDSHAKE_RPC_DEADLINE`] applied.
    pub fn send(&self, req: HandshakeRequest) -> Result<HandshakeResponse, HandshakeError> {
        {
            let mut writer = self.inner.writer.lock();
            if writer.is_none() {
                let opened = self
                    .channel
                    .open(HANDSHAKE_RPC_DEADLINE, self.reader())
                    .map_err(HandshakeError::Terminated)?;
                *writer = Some(opened);
            }
            if let Some(err) = self.inner.terminal.get() {
                return Err(err.clone());
            }
            if !self.inner.slot_rx.is_empty() {
                return Err(HandshakeError::UnexpectedResponse);
            }
            match writer.as_mut() {
                Some(writer) => writer.write(req).map_err(HandshakeError::Terminated)?,
                None => return Err(HandshakeError::NoResponse),
            }
            // The writer lock is released before blocking so the reader
            // thread can half-close on a protocol violation.
        }

        match self.inner.slot_rx.recv() {
            Ok(Some(resp)) => Ok(resp),
            Ok(None) | Err(_) => Err(self
                .inner
                .terminal
                .get()
                .cloned()
                .unwrap_or(HandshakeError::NoResponse)),
        }
    }

    /// Half-close the writer if the stream was ever opened. Idempotent.
    pub fn close(&self) {
        self.inner.half_close_writer();
    }
}

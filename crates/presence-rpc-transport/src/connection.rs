//! A connected IPC stream with an out-of-band close signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::{ConnectionId, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Any bidirectional byte stream the transport can drive.
pub trait IpcStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> IpcStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A single connection to one local endpoint.
///
/// All I/O happens on the task that owns the connection. Other tasks hold
/// a [`ConnectionCloser`] and use it to abort whatever operation is in
/// progress.
pub struct PipeConnection {
    id: ConnectionId,
    pipe: u8,
    stream: Box<dyn IpcStream>,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

impl PipeConnection {
    /// Wraps an already-connected stream as the connection for `pipe`.
    pub fn from_stream(pipe: u8, stream: impl IpcStream) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            pipe,
            stream: Box::new(stream),
            closed_tx: Arc::new(closed_tx),
            closed_rx,
        }
    }

    /// Returns the unique identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The endpoint index this connection was opened on.
    pub fn pipe(&self) -> u8 {
        self.pipe
    }

    /// Returns a handle that can close this connection from another task.
    pub fn closer(&self) -> ConnectionCloser {
        ConnectionCloser {
            id: self.id,
            tx: Arc::clone(&self.closed_tx),
        }
    }

    /// Whether [`close`](Self::close) or a closer has been invoked.
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Reads whatever bytes are available and appends them to `buf`.
    ///
    /// Returns the number of bytes read (always > 0). Cancel-safe: if the
    /// future is dropped before completing, no data is lost.
    ///
    /// # Errors
    /// - [`TransportError::ConnectionClosed`] on end of stream
    /// - [`TransportError::Aborted`] if the connection was closed locally
    /// - [`TransportError::ReceiveFailed`] on any other I/O error
    pub async fn recv(&mut self, buf: &mut BytesMut) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Aborted);
        }
        tokio::select! {
            biased;
            _ = wait_closed(&mut self.closed_rx) => Err(TransportError::Aborted),
            read = self.stream.read_buf(buf) => match read {
                Ok(0) => Err(TransportError::ConnectionClosed),
                Ok(n) => Ok(n),
                Err(e) => Err(TransportError::ReceiveFailed(e)),
            },
        }
    }

    /// Writes all of `data` and flushes it.
    ///
    /// # Errors
    /// - [`TransportError::Aborted`] if the connection was closed locally
    /// - [`TransportError::SendFailed`] on I/O error
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Aborted);
        }
        let stream = &mut self.stream;
        tokio::select! {
            biased;
            _ = wait_closed(&mut self.closed_rx) => Err(TransportError::Aborted),
            written = async {
                stream.write_all(data).await?;
                stream.flush().await
            } => written.map_err(TransportError::SendFailed),
        }
    }

    /// Closes the connection and releases the endpoint.
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        self.closed_tx.send_replace(true);
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!(conn_id = %self.id, error = %e, "shutdown after close failed");
        }
        tracing::debug!(conn_id = %self.id, pipe = self.pipe, "connection closed");
    }
}

impl std::fmt::Debug for PipeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeConnection")
            .field("id", &self.id)
            .field("pipe", &self.pipe)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes a [`PipeConnection`] from any thread.
///
/// Closing makes a pending `recv` or `send` on the owning task return
/// [`TransportError::Aborted`] immediately.
#[derive(Debug, Clone)]
pub struct ConnectionCloser {
    id: ConnectionId,
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectionCloser {
    /// The connection this handle closes.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Marks the connection closed, unblocking in-progress I/O.
    pub fn close(&self) {
        if !self.tx.send_replace(true) {
            tracing::debug!(conn_id = %self.id, "connection closed from another task");
        }
    }
}

/// Resolves once the closed flag is set.
async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can close us any more.
            std::future::pending::<()>().await;
        }
    }
}

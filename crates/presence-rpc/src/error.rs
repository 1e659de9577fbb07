//! Unified error type for presence-rpc.

use presence_rpc_protocol::{FrameError, HandshakeError, ProtocolError};
use presence_rpc_session::CommandError;
use presence_rpc_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Connection-level failures are handled inside the worker and reported
/// as messages; this type covers what the public API can refuse up front,
/// plus the sub-crate errors for callers that drive the layers directly.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A transport-level error (discovery, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The byte stream was unusable.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The handshake did not reach `READY`.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// A command did not complete.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The presence did not serialize to a JSON object.
    #[error("invalid presence: {0}")]
    InvalidPresence(String),

    /// Join and spectate subscriptions need a registered URI scheme.
    #[error("event subscriptions require a registered URI scheme")]
    UriSchemeNotRegistered,

    /// `connect` was called more than once.
    #[error("client already connected")]
    AlreadyConnected,

    /// The client was closed, or stopped after a fatal error.
    #[error("client disposed")]
    Disposed,

    /// `connect` was called outside a tokio runtime.
    #[error("no tokio runtime available to run the worker")]
    NoRuntime,
}

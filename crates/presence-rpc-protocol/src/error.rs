//! Error types for the protocol layer.
//!
//! Three enums, one per kind of failure, because the connection treats
//! them differently:
//!
//! - [`ProtocolError`]: one payload could not be encoded or understood.
//!   The frame is dropped; the connection lives on.
//! - [`FrameError`]: the byte stream itself is unusable (oversized or
//!   truncated frame, broken transport). The connection is torn down.
//! - [`HandshakeError`]: the peer did not acknowledge our handshake.
//!   Retried with backoff, except for a protocol version mismatch.

use presence_rpc_transport::TransportError;

/// Errors encoding or decoding a single JSON payload.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into JSON bytes).
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Deserialization failed (malformed JSON or wrong shape).
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The frame carried an opcode this client does not know.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
}

/// Errors that make the current byte stream unusable.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header announced a payload larger than the configured bound.
    #[error("frame payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: u32, max: u32 },

    /// The stream ended after part of a frame had arrived.
    #[error("stream ended mid-frame with {buffered} bytes buffered")]
    Truncated { buffered: usize },

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Reasons a handshake attempt did not reach `Ready`.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The peer speaks a different protocol version. Not retryable.
    #[error("protocol version mismatch: client supports {supported}, peer sent {received}")]
    VersionMismatch { supported: u32, received: u32 },

    /// The peer answered the handshake with an `ERROR` event.
    #[error("handshake rejected ({code}): {message}")]
    Rejected { code: i32, message: String },

    /// The peer sent a `Close` frame instead of `READY`.
    #[error("peer closed during handshake ({code}): {reason}")]
    PeerClosed { code: i32, reason: String },

    /// The first frame had an opcode other than `Frame` or `Close`.
    #[error("unexpected opcode {0} during handshake")]
    UnexpectedOpcode(u32),

    /// The first event was not `READY`.
    #[error("unexpected event during handshake: {0}")]
    UnexpectedEvent(String),

    /// No acknowledgement arrived in time.
    #[error("handshake timed out")]
    TimedOut,

    /// The acknowledgement payload could not be parsed.
    #[error(transparent)]
    Malformed(#[from] ProtocolError),

    /// The stream failed before the acknowledgement arrived.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl HandshakeError {
    /// Whether a later connection attempt might succeed.
    ///
    /// Everything is retryable except a version mismatch: protocol
    /// incompatibility does not go away with time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, HandshakeError::VersionMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_is_not_retryable() {
        let err = HandshakeError::VersionMismatch {
            supported: 1,
            received: 2,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("supports 1"));
    }

    #[test]
    fn test_other_handshake_errors_are_retryable() {
        assert!(HandshakeError::TimedOut.is_retryable());
        assert!(HandshakeError::UnexpectedOpcode(3).is_retryable());
        assert!(
            HandshakeError::PeerClosed {
                code: 4000,
                reason: "Invalid Client ID".into()
            }
            .is_retryable()
        );
        let frame: HandshakeError =
            FrameError::Transport(TransportError::ConnectionClosed).into();
        assert!(frame.is_retryable());
    }
}

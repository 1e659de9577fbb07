//! The opening exchange on a new connection.
//!
//! ```text
//! client                                  peer
//!   │── Handshake {v: 1, client_id} ──────▶│
//!   │◀───────── Frame {evt: READY, data} ──│   ok: Ready
//!   │◀───────── Frame {evt: ERROR, data} ──│   rejected
//!   │◀───────── Close {code, message} ─────│   rejected
//! ```
//!
//! Building and checking frames is pure; the connection worker does the
//! I/O and applies the timeout.

use crate::{
    ClosePayload, ErrorMessage, EventPayload, Frame, HandshakeError, HandshakePayload, Opcode,
    ProtocolError, ReadyMessage, ServerEvent,
};

/// The only protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Builds the `Handshake` frame for `client_id`.
///
/// # Errors
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn handshake_frame(client_id: &str) -> Result<Frame, ProtocolError> {
    Frame::json(
        Opcode::Handshake,
        &HandshakePayload {
            v: PROTOCOL_VERSION,
            client_id: client_id.to_owned(),
        },
    )
}

/// Checks the first frame the peer sent after our handshake.
///
/// A `READY` event whose `data.v` is absent is accepted as version
/// `supported`; any other value must match exactly.
///
/// # Errors
/// See [`HandshakeError`]; only [`HandshakeError::VersionMismatch`] is
/// non-retryable.
pub fn validate_ack(frame: &Frame, supported: u32) -> Result<ReadyMessage, HandshakeError> {
    match frame.opcode() {
        Some(Opcode::Frame) => {}
        Some(Opcode::Close) => {
            let close: ClosePayload = frame.parse()?;
            return Err(HandshakeError::PeerClosed {
                code: close.code,
                reason: close.reason,
            });
        }
        _ => return Err(HandshakeError::UnexpectedOpcode(frame.raw_opcode())),
    }

    let payload: EventPayload = frame.parse()?;
    match payload.event() {
        Some(ServerEvent::Ready) => {
            let ready: ReadyMessage = payload.data_as()?;
            match ready.v {
                Some(received) if received != supported => {
                    Err(HandshakeError::VersionMismatch { supported, received })
                }
                _ => Ok(ready),
            }
        }
        Some(ServerEvent::Error) => {
            let error: ErrorMessage = payload.data_as()?;
            Err(HandshakeError::Rejected {
                code: error.code,
                message: error.message,
            })
        }
        _ => Err(HandshakeError::UnexpectedEvent(
            payload
                .evt
                .map(|e| e.to_string())
                .unwrap_or_else(|| "<none>".to_owned()),
        )),
    }
}

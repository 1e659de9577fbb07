//! Binary framing: `opcode (u32 LE) | length (u32 LE) | payload`.
//!
//! ```text
//! ┌────────────┬────────────┬──────────────────────────┐
//! │ opcode u32 │ length u32 │ payload: `length` bytes  │
//! │ (LE)       │ (LE)       │ UTF-8 JSON               │
//! └────────────┴────────────┴──────────────────────────┘
//! ```
//!
//! [`FrameCodec`] does no I/O. [`FrameReader`] pairs it with a buffer so a
//! connection can be decoded one frame at a time; bytes that arrive after a
//! complete frame stay buffered for the next call.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use presence_rpc_transport::{PipeConnection, TransportError};
use serde::{Serialize, de::DeserializeOwned};

use crate::{FrameError, ProtocolError};

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 8;

/// Default upper bound on a single payload (1 MiB).
pub const DEFAULT_MAX_PAYLOAD: u32 = 1024 * 1024;

/// Frame opcodes understood by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// First frame on a connection, client → peer.
    Handshake = 0,
    /// A command or event carrying a JSON payload.
    Frame = 1,
    /// Pipe-level close notice.
    Close = 2,
    /// Keep-alive probe; answered with `Pong`.
    Ping = 3,
    /// Keep-alive answer.
    Pong = 4,
}

impl Opcode {
    /// Maps a raw header value to an opcode.
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Opcode::Handshake),
            1 => Some(Opcode::Frame),
            2 => Some(Opcode::Close),
            3 => Some(Opcode::Ping),
            4 => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// The raw header value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// One decoded frame.
///
/// The opcode is kept raw so that frames with unknown opcodes can still be
/// decoded (and then dropped by the caller) without desynchronizing the
/// stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: u32,
    payload: Bytes,
}

impl Frame {
    /// Creates a frame from an opcode and payload bytes.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: opcode.as_u32(),
            payload: payload.into(),
        }
    }

    /// Creates a frame whose payload is `value` serialized as JSON.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn json<T: Serialize>(opcode: Opcode, value: &T) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_vec(value).map_err(ProtocolError::Encode)?;
        Ok(Self::new(opcode, payload))
    }

    /// The opcode, or `None` if the header carried an unknown value.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u32(self.opcode)
    }

    /// The opcode, failing with [`ProtocolError::UnknownOpcode`] for values
    /// this client does not understand.
    pub fn known_opcode(&self) -> Result<Opcode, ProtocolError> {
        self.opcode().ok_or(ProtocolError::UnknownOpcode(self.opcode))
    }

    /// The opcode exactly as it appeared in the header.
    pub fn raw_opcode(&self) -> u32 {
        self.opcode
    }

    /// The payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Parses the payload as JSON into `T`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] on malformed or mismatched JSON.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_slice(&self.payload).map_err(ProtocolError::Decode)
    }
}

/// Encodes and decodes frames. Pure; holds only the payload bound.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Creates a codec with the default payload bound.
    pub fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Creates a codec with a custom payload bound.
    pub fn with_max_payload(max_payload: u32) -> Self {
        Self { max_payload }
    }

    /// The largest payload this codec will encode or accept.
    pub fn max_payload(&self) -> u32 {
        self.max_payload
    }

    /// Appends the header and payload of `frame` to `dst`.
    ///
    /// The length field is always derived from the payload itself.
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadTooLarge`] if the payload exceeds the bound.
    pub fn encode(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = u32::try_from(frame.payload.len())
            .ok()
            .filter(|len| *len <= self.max_payload)
            .ok_or(FrameError::PayloadTooLarge {
                len: u32::try_from(frame.payload.len()).unwrap_or(u32::MAX),
                max: self.max_payload,
            })?;

        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u32_le(frame.opcode);
        dst.put_u32_le(len);
        dst.put_slice(&frame.payload);
        Ok(())
    }

    /// Encodes `frame` into a fresh buffer.
    ///
    /// # Errors
    /// Same as [`encode`](Self::encode).
    pub fn encode_to_bytes(&self, frame: &Frame) -> Result<Bytes, FrameError> {
        let mut dst = BytesMut::with_capacity(HEADER_LEN + frame.payload.len());
        self.encode(frame, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Tries to take one complete frame off the front of `src`.
    ///
    /// - `Ok(Some(frame))`: a frame was removed from `src`; any following
    ///   bytes remain for the next call
    /// - `Ok(None)`: incomplete; `src` is untouched and more bytes are needed
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadTooLarge`] as soon as a header announces
    /// an oversized payload, without waiting for the payload bytes.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let opcode = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        let len = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);
        if len > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                len,
                max: self.max_payload,
            });
        }

        let total = HEADER_LEN + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len as usize).freeze();
        Ok(Some(Frame { opcode, payload }))
    }
}

/// Reads frames off a [`PipeConnection`], one per call.
///
/// Owns the read-ahead buffer for one connection. `next_frame` is
/// cancel-safe, so it can sit in a `tokio::select!` next to other work.
#[derive(Debug, Default)]
pub struct FrameReader {
    codec: FrameCodec,
    buf: BytesMut,
}

impl FrameReader {
    /// Creates a reader with the given codec.
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Number of bytes received but not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Waits for the next complete frame.
    ///
    /// # Errors
    /// - [`FrameError::Truncated`] if the peer closed mid-frame
    /// - [`FrameError::PayloadTooLarge`] on an oversized header
    /// - [`FrameError::Transport`] for any other transport failure
    pub async fn next_frame(&mut self, conn: &mut PipeConnection) -> Result<Frame, FrameError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                tracing::trace!(
                    conn_id = %conn.id(),
                    opcode = frame.raw_opcode(),
                    len = frame.payload().len(),
                    "frame decoded"
                );
                return Ok(frame);
            }
            match conn.recv(&mut self.buf).await {
                Ok(_) => {}
                Err(TransportError::ConnectionClosed) if !self.buf.is_empty() => {
                    return Err(FrameError::Truncated {
                        buffered: self.buf.len(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(opcode: Opcode, payload: &[u8]) -> BytesMut {
        let mut dst = BytesMut::new();
        FrameCodec::new()
            .encode(&Frame::new(opcode, payload.to_vec()), &mut dst)
            .unwrap();
        dst
    }

    // =====================================================================
    // Opcode
    // =====================================================================

    #[test]
    fn test_opcode_wire_values() {
        assert_eq!(Opcode::Handshake.as_u32(), 0);
        assert_eq!(Opcode::Frame.as_u32(), 1);
        assert_eq!(Opcode::Close.as_u32(), 2);
        assert_eq!(Opcode::Ping.as_u32(), 3);
        assert_eq!(Opcode::Pong.as_u32(), 4);
    }

    #[test]
    fn test_opcode_from_u32_rejects_unknown() {
        for op in 0..5 {
            assert_eq!(Opcode::from_u32(op).map(Opcode::as_u32), Some(op));
        }
        assert_eq!(Opcode::from_u32(5), None);
        assert_eq!(Opcode::from_u32(u32::MAX), None);
    }

    // =====================================================================
    // encode
    // =====================================================================

    #[test]
    fn test_encode_writes_little_endian_header() {
        let bytes = encode(Opcode::Frame, b"{}");

        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[2, 0, 0, 0]);
        assert_eq!(&bytes[8..], b"{}");
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let codec = FrameCodec::with_max_payload(4);
        let frame = Frame::new(Opcode::Frame, b"12345".to_vec());

        let result = codec.encode(&frame, &mut BytesMut::new());

        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge { len: 5, max: 4 })
        ));
    }

    // =====================================================================
    // decode
    // =====================================================================

    #[test]
    fn test_decode_returns_encoded_frame() {
        let payload = br#"{"cmd":"DISPATCH","evt":"READY"}"#;
        let mut buf = encode(Opcode::Frame, payload);

        let frame = FrameCodec::new().decode(&mut buf).unwrap().unwrap();

        assert_eq!(frame.opcode(), Some(Opcode::Frame));
        assert_eq!(&frame.payload()[..], payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_every_truncation_is_incomplete() {
        // Cutting a frame at any offset must yield "need more", never a
        // frame and never an error.
        let full = encode(Opcode::Handshake, br#"{"v":1,"client_id":"42"}"#);
        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            let result = FrameCodec::new().decode(&mut partial).unwrap();
            assert!(result.is_none(), "cut at {cut} produced a frame");
            assert_eq!(partial.len(), cut, "incomplete decode must not consume");
        }
    }

    #[test]
    fn test_decode_keeps_trailing_bytes_for_next_call() {
        let mut buf = encode(Opcode::Ping, b"[1]");
        buf.extend_from_slice(&encode(Opcode::Pong, b"[2]"));
        buf.extend_from_slice(&[4, 0]);

        let codec = FrameCodec::new();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        let third = codec.decode(&mut buf).unwrap();

        assert_eq!(first.opcode(), Some(Opcode::Ping));
        assert_eq!(second.opcode(), Some(Opcode::Pong));
        assert_eq!(&second.payload()[..], b"[2]");
        assert!(third.is_none());
        assert_eq!(&buf[..], &[4, 0]);
    }

    #[test]
    fn test_decode_rejects_oversized_length_before_payload_arrives() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        buf.put_u32_le(DEFAULT_MAX_PAYLOAD + 1);

        let result = FrameCodec::new().decode(&mut buf);

        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_decode_unknown_opcode_still_frames() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(77);
        buf.put_u32_le(2);
        buf.put_slice(b"{}");

        let frame = FrameCodec::new().decode(&mut buf).unwrap().unwrap();

        assert_eq!(frame.opcode(), None);
        assert_eq!(frame.raw_opcode(), 77);
        assert!(matches!(
            frame.known_opcode(),
            Err(ProtocolError::UnknownOpcode(77))
        ));
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut buf = encode(Opcode::Pong, b"");
        let frame = FrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert!(frame.payload().is_empty());
    }

    // =====================================================================
    // Frame helpers
    // =====================================================================

    #[test]
    fn test_frame_json_and_parse() {
        let frame = Frame::json(Opcode::Frame, &serde_json::json!({"a": 1})).unwrap();
        let value: serde_json::Value = frame.parse().unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_frame_parse_garbage_is_decode_error() {
        let frame = Frame::new(Opcode::Frame, b"not json".to_vec());
        let result: Result<serde_json::Value, _> = frame.parse();
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}

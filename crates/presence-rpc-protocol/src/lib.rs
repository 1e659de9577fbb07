//! Wire protocol for the local rich-presence IPC.
//!
//! This crate defines the "language" the client and the desktop
//! application speak:
//!
//! - **Frames** ([`Frame`], [`FrameCodec`], [`FrameReader`]): the
//!   `opcode | length | JSON` binary envelope.
//! - **Wire names** ([`Command`], [`ServerEvent`]): the strings in the
//!   `cmd`/`evt` fields, each backed by one static table.
//! - **Payloads** ([`ArgumentPayload`], [`EventPayload`], [`ClosePayload`]):
//!   the JSON schemas inside frames.
//! - **Handshake** ([`handshake_frame`], [`validate_ack`]): the opening
//!   exchange on each connection.
//! - **Messages** ([`Message`]): what subscribers eventually receive.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the client
//! worker. It knows nothing about reconnects or queues; apart from
//! [`FrameReader`], which pulls bytes off a connection, it is pure.
//!
//! ```text
//! Transport (bytes) → Protocol (Frame → EventPayload → Message) → Client
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod error;
mod frame;
mod handshake;
mod message;
mod payload;
mod types;
mod wire;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::{FrameError, HandshakeError, ProtocolError};
pub use frame::{DEFAULT_MAX_PAYLOAD, Frame, FrameCodec, FrameReader, HEADER_LEN, Opcode};
pub use handshake::{PROTOCOL_VERSION, handshake_frame, validate_ack};
pub use message::{
    CloseMessage, ErrorMessage, FatalMessage, JoinRequestMessage, Message, MessageKind,
    PresenceMessage, ReadyMessage, SecretMessage,
};
pub use payload::{
    ArgumentPayload, ClosePayload, CloseRequest, EventPayload, HandshakePayload, JoinReplyArgs,
    SetActivityArgs,
};
pub use types::{
    Assets, Button, Configuration, EventFlags, Party, RichPresence, Secrets, Timestamps, User,
};
pub use wire::{Command, ServerEvent, Wire};

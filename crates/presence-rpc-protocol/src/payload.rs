//! JSON schemas carried inside frames.
//!
//! Outbound commands are [`ArgumentPayload`]s; everything the peer sends on
//! the `Frame` opcode is an [`EventPayload`]. `Close` frames carry a
//! [`ClosePayload`] inbound and a [`CloseRequest`] outbound.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Command, ProtocolError, ServerEvent, Wire};

/// An outbound command: `{"cmd", "args", "evt"?, "nonce"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentPayload {
    pub cmd: Command,

    /// Only `SUBSCRIBE`/`UNSUBSCRIBE` name an event, at the top level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evt: Option<ServerEvent>,

    pub args: Value,

    pub nonce: Option<String>,
}

impl ArgumentPayload {
    /// A command without nonce or event.
    pub fn new(cmd: Command, args: Value) -> Self {
        Self {
            cmd,
            evt: None,
            args,
            nonce: None,
        }
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn with_event(mut self, evt: ServerEvent) -> Self {
        self.evt = Some(evt);
        self
    }
}

/// An inbound payload on the `Frame` opcode.
///
/// Every field is optional on the wire. Unknown `cmd`/`evt` names are kept
/// as text (see [`Wire`]) so one unfamiliar event does not poison parsing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub cmd: Option<Wire<Command>>,

    #[serde(default)]
    pub evt: Option<Wire<ServerEvent>>,

    #[serde(default)]
    pub data: Value,

    #[serde(default, deserialize_with = "nonce_string")]
    pub nonce: Option<String>,
}

impl EventPayload {
    /// The event, if it is one this client knows.
    pub fn event(&self) -> Option<ServerEvent> {
        self.evt.as_ref().and_then(Wire::known)
    }

    /// The echoed command, if it is one this client knows.
    pub fn command(&self) -> Option<Command> {
        self.cmd.as_ref().and_then(Wire::known)
    }

    /// Parses `data` into `T`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if `data` does not have `T`'s shape.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.data).map_err(ProtocolError::Decode)
    }
}

/// Accepts the nonce as a string or a number.
fn nonce_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Inbound pipe-level close notice: `{"code", "message"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClosePayload {
    #[serde(default = "unknown_close_code")]
    pub code: i32,

    #[serde(default, rename = "message")]
    pub reason: String,
}

fn unknown_close_code() -> i32 {
    -1
}

/// The first frame on a connection: `{"v", "client_id"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub v: u32,
    pub client_id: String,
}

/// Outbound close request sent on the `Close` opcode during disposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseRequest {
    pub pid: u32,
    pub close_reason: String,
}

impl CloseRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            close_reason: reason.into(),
        }
    }
}

/// `SET_ACTIVITY` arguments. `activity: null` clears the presence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetActivityArgs {
    pub pid: u32,
    pub activity: Option<Value>,
}

impl SetActivityArgs {
    pub fn new(activity: Option<Value>) -> Self {
        Self {
            pid: std::process::id(),
            activity,
        }
    }
}

/// Arguments of the two join-request replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinReplyArgs {
    pub user_id: String,
}

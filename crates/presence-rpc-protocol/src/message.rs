//! Typed messages delivered to subscribers.
//!
//! [`Message`] is the one type callers see. Each variant wraps a small
//! struct so subscribers can hold on to the data they care about;
//! [`MessageKind`] is the fieldless discriminant used to register for one
//! kind only.

use serde::Deserialize;
use serde_json::Value;

use crate::{Configuration, EventPayload, ProtocolError, ServerEvent, User};

/// The discriminant of [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ready,
    Close,
    Error,
    ConnectionEstablished,
    ConnectionFailed,
    PresenceUpdate,
    Join,
    Spectate,
    JoinRequest,
    Fatal,
}

/// Everything the client reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Handshake accepted; carries peer metadata.
    Ready(ReadyMessage),
    /// The connection closed. A reconnect follows unless the client is
    /// being disposed.
    Close(CloseMessage),
    /// The peer reported an error that no pending command claimed.
    Error(ErrorMessage),
    /// A pipe accepted the connection.
    ConnectionEstablished { pipe: u8 },
    /// Discovery found no listening pipe (`pipe` is the requested index,
    /// if one was configured).
    ConnectionFailed { pipe: Option<u8> },
    /// The peer confirmed a presence change.
    PresenceUpdate(PresenceMessage),
    /// Another user joined; carries the join secret.
    Join(SecretMessage),
    /// Another user started spectating; carries the spectate secret.
    Spectate(SecretMessage),
    /// Another user asked to join. Answer with a join reply.
    JoinRequest(JoinRequestMessage),
    /// The client stopped for good and will not reconnect.
    Fatal(FatalMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Ready(_) => MessageKind::Ready,
            Message::Close(_) => MessageKind::Close,
            Message::Error(_) => MessageKind::Error,
            Message::ConnectionEstablished { .. } => MessageKind::ConnectionEstablished,
            Message::ConnectionFailed { .. } => MessageKind::ConnectionFailed,
            Message::PresenceUpdate(_) => MessageKind::PresenceUpdate,
            Message::Join(_) => MessageKind::Join,
            Message::Spectate(_) => MessageKind::Spectate,
            Message::JoinRequest(_) => MessageKind::JoinRequest,
            Message::Fatal(_) => MessageKind::Fatal,
        }
    }

    /// Maps an inbound payload that no pending command claimed.
    ///
    /// Returns `Ok(None)` for payloads that carry nothing for subscribers
    /// (unknown events, or replies to commands nobody is waiting on).
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] when a known event's `data` has the
    /// wrong shape.
    pub fn from_event(payload: &EventPayload) -> Result<Option<Message>, ProtocolError> {
        let message = match payload.event() {
            Some(ServerEvent::Ready) => Message::Ready(payload.data_as()?),
            Some(ServerEvent::Error) => Message::Error(payload.data_as()?),
            Some(ServerEvent::ActivityJoin) => Message::Join(payload.data_as()?),
            Some(ServerEvent::ActivitySpectate) => Message::Spectate(payload.data_as()?),
            Some(ServerEvent::ActivityJoinRequest) => Message::JoinRequest(payload.data_as()?),
            None if payload.evt.is_some() => return Ok(None),
            None => match payload.command() {
                Some(crate::Command::SetActivity) => {
                    Message::PresenceUpdate(PresenceMessage::from_data(&payload.data))
                }
                _ => return Ok(None),
            },
        };
        Ok(Some(message))
    }
}

/// Data of the `READY` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReadyMessage {
    /// Protocol version the peer speaks. Absent on some peers.
    #[serde(default)]
    pub v: Option<u32>,
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub config: Configuration,
}

/// Why the connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseMessage {
    /// Peer close code, or `-1` for local transport failures.
    pub code: i32,
    pub reason: String,
}

/// An `ERROR` event or an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// The presence the peer now shows for this application.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMessage {
    /// Name of the application, or `"No Rich Presence"` when cleared.
    pub name: String,
    pub application_id: String,
    /// The activity exactly as the peer reported it; `None` when cleared.
    pub presence: Option<Value>,
}

impl PresenceMessage {
    fn from_data(data: &Value) -> Self {
        if data.is_null() {
            return Self {
                name: "No Rich Presence".to_owned(),
                application_id: String::new(),
                presence: None,
            };
        }
        let text = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        Self {
            name: text("name"),
            application_id: text("application_id"),
            presence: Some(data.clone()),
        }
    }
}

/// Data of `ACTIVITY_JOIN` and `ACTIVITY_SPECTATE`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SecretMessage {
    pub secret: String,
}

/// Data of `ACTIVITY_JOIN_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JoinRequestMessage {
    pub user: User,
}

/// Why the client gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalMessage {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> EventPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_from_event_ready_with_metadata() {
        let p = payload(
            r#"{"cmd":"DISPATCH","evt":"READY","data":{"v":1,
                "user":{"id":"1","username":"ada"},
                "config":{"cdn_host":"cdn.example","api_endpoint":"//api","environment":"production"}}}"#,
        );

        let Some(Message::Ready(ready)) = Message::from_event(&p).unwrap() else {
            panic!("expected Ready");
        };

        assert_eq!(ready.v, Some(1));
        assert_eq!(ready.user.username, "ada");
        assert_eq!(ready.config.environment, "production");
    }

    #[test]
    fn test_from_event_join_request() {
        let p = payload(
            r#"{"evt":"ACTIVITY_JOIN_REQUEST","data":{"user":{"id":"9","username":"bo"}}}"#,
        );
        let message = Message::from_event(&p).unwrap().unwrap();
        assert_eq!(message.kind(), MessageKind::JoinRequest);
    }

    #[test]
    fn test_from_event_secret_messages() {
        let join = Message::from_event(&payload(
            r#"{"evt":"ACTIVITY_JOIN","data":{"secret":"s1"}}"#,
        ))
        .unwrap();
        assert_eq!(
            join,
            Some(Message::Join(SecretMessage { secret: "s1".into() }))
        );

        let spectate = Message::from_event(&payload(
            r#"{"evt":"ACTIVITY_SPECTATE","data":{"secret":"s2"}}"#,
        ))
        .unwrap();
        assert_eq!(spectate.map(|m| m.kind()), Some(MessageKind::Spectate));
    }

    #[test]
    fn test_from_event_error() {
        let p = payload(r#"{"evt":"ERROR","data":{"code":4000,"message":"bad"}}"#);
        assert_eq!(
            Message::from_event(&p).unwrap(),
            Some(Message::Error(ErrorMessage {
                code: 4000,
                message: "bad".into()
            }))
        );
    }

    #[test]
    fn test_from_event_set_activity_reply_is_presence_update() {
        let p = payload(
            r#"{"cmd":"SET_ACTIVITY","data":{"name":"Game","application_id":"42","details":"d"},"nonce":"3"}"#,
        );
        let Some(Message::PresenceUpdate(update)) = Message::from_event(&p).unwrap() else {
            panic!("expected PresenceUpdate");
        };
        assert_eq!(update.name, "Game");
        assert_eq!(update.application_id, "42");
        assert_eq!(update.presence.unwrap()["details"], "d");
    }

    #[test]
    fn test_from_event_cleared_presence() {
        let p = payload(r#"{"cmd":"SET_ACTIVITY","data":null}"#);
        let Some(Message::PresenceUpdate(update)) = Message::from_event(&p).unwrap() else {
            panic!("expected PresenceUpdate");
        };
        assert_eq!(update.name, "No Rich Presence");
        assert!(update.presence.is_none());
    }

    #[test]
    fn test_from_event_unknown_event_is_ignored() {
        let p = payload(r#"{"evt":"GUILD_STATUS","data":{}}"#);
        assert_eq!(Message::from_event(&p).unwrap(), None);
    }

    #[test]
    fn test_from_event_malformed_data_is_decode_error() {
        let p = payload(r#"{"evt":"ACTIVITY_JOIN","data":{"secret":5}}"#);
        assert!(matches!(
            Message::from_event(&p),
            Err(ProtocolError::Decode(_))
        ));
    }
}

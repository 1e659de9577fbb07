//! Inbound frame routing and subscriber fan-out.
//!
//! Every frame the worker reads goes through [`Dispatcher::on_frame`]:
//!
//! ```text
//! Frame ─┬─ Ping ─────────────────────────────▶ answer with Pong
//!        ├─ Close ────────────────────────────▶ tear connection down
//!        └─ Frame ─▶ EventPayload ─┬─ nonce pending? ─▶ CommandQueue::resolve
//!                                  └─ otherwise ──────▶ Message ─▶ publish
//! ```
//!
//! Publishing either runs callbacks right away on the worker task
//! ([`DeliveryMode::Immediate`]) or parks the message until the caller
//! drains it with `invoke` ([`DeliveryMode::Queued`]). Either way
//! subscribers see messages in arrival order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use presence_rpc_protocol::{
    ClosePayload, CloseMessage, ErrorMessage, EventPayload, Frame, Message, MessageKind, Opcode,
    ServerEvent,
};
use presence_rpc_session::CommandQueue;
use tracing::{debug, trace, warn};

use crate::DeliveryMode;

/// A subscriber callback.
pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Handle returned by `on`/`on_any`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    /// `None` receives every kind.
    kind: Option<MessageKind>,
    callback: Callback,
}

/// What the worker must do after a frame was dispatched.
#[derive(Debug, PartialEq)]
pub(crate) enum Dispatch {
    /// Nothing further.
    Handled,
    /// Reply with a `Pong` carrying these bytes.
    Pong(Bytes),
    /// The peer closed the pipe.
    PeerClosed(CloseMessage),
}

pub(crate) struct Dispatcher {
    mode: DeliveryMode,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    queued: Mutex<VecDeque<Message>>,
    max_queued: usize,
}

impl Dispatcher {
    pub(crate) fn new(mode: DeliveryMode, max_queued: usize) -> Self {
        Self {
            mode,
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            queued: Mutex::new(VecDeque::new()),
            max_queued: max_queued.max(1),
        }
    }

    // -----------------------------------------------------------------------
    // Subscribers
    // -----------------------------------------------------------------------

    pub(crate) fn subscribe(&self, kind: Option<MessageKind>, callback: Callback) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, kind, callback });
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Runs every matching callback, in registration order.
    ///
    /// The list is copied first so a callback may subscribe or unsubscribe
    /// without deadlocking.
    fn deliver(&self, message: &Message) {
        let kind = message.kind();
        let targets: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.kind.is_none_or(|k| k == kind))
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in targets {
            callback(message);
        }
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    pub(crate) fn publish(&self, message: Message) {
        trace!(kind = ?message.kind(), "publishing message");
        match self.mode {
            DeliveryMode::Immediate => self.deliver(&message),
            DeliveryMode::Queued => {
                let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
                if queued.len() >= self.max_queued {
                    if let Some(dropped) = queued.pop_front() {
                        warn!(kind = ?dropped.kind(), "message queue full, dropping oldest");
                    }
                }
                queued.push_back(message);
            }
        }
    }

    /// Drains queued messages, running callbacks for each on the calling
    /// task. Always empty in immediate mode.
    pub(crate) fn invoke(&self) -> Vec<Message> {
        let drained: Vec<Message> = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for message in &drained {
            self.deliver(message);
        }
        drained
    }

    pub(crate) fn clear_queued(&self) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    // -----------------------------------------------------------------------
    // Frame routing
    // -----------------------------------------------------------------------

    /// Routes one inbound frame. Malformed payloads are logged and dropped.
    pub(crate) fn on_frame(&self, frame: &Frame, queue: &CommandQueue) -> Dispatch {
        let opcode = match frame.known_opcode() {
            Ok(opcode) => opcode,
            Err(e) => {
                warn!(error = %e, "dropping frame");
                return Dispatch::Handled;
            }
        };

        match opcode {
            Opcode::Ping => Dispatch::Pong(frame.payload().clone()),
            Opcode::Pong => {
                trace!("pong received");
                Dispatch::Handled
            }
            Opcode::Close => {
                let close = frame.parse::<ClosePayload>().unwrap_or_else(|e| {
                    debug!(error = %e, "unreadable close payload");
                    ClosePayload {
                        code: -1,
                        reason: String::new(),
                    }
                });
                Dispatch::PeerClosed(CloseMessage {
                    code: close.code,
                    reason: close.reason,
                })
            }
            Opcode::Handshake => {
                warn!("peer sent a handshake frame, dropping");
                Dispatch::Handled
            }
            Opcode::Frame => {
                match frame.parse::<EventPayload>() {
                    Ok(payload) => self.on_event(payload, queue),
                    Err(e) => warn!(error = %e, "dropping malformed payload"),
                }
                Dispatch::Handled
            }
        }
    }

    fn on_event(&self, payload: EventPayload, queue: &CommandQueue) {
        if let Some(nonce) = payload.nonce.as_deref() {
            if queue.is_pending(nonce) {
                let outcome = if payload.event() == Some(ServerEvent::Error) {
                    Err(payload.data_as::<ErrorMessage>().unwrap_or_else(|_| ErrorMessage {
                        code: -1,
                        message: payload.data.to_string(),
                    }))
                } else {
                    Ok(payload.data.clone())
                };
                queue.resolve(nonce, outcome);
                return;
            }
        }

        match Message::from_event(&payload) {
            Ok(Some(message)) => self.publish(message),
            Ok(None) => trace!(
                evt = ?payload.evt,
                cmd = ?payload.cmd,
                "payload carries nothing for subscribers"
            ),
            Err(e) => warn!(error = %e, "dropping event with malformed data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use presence_rpc_protocol::{Command, SecretMessage};
    use presence_rpc_session::CommandError;
    use serde_json::json;

    use super::*;

    // -- Helpers ----------------------------------------------------------

    fn frame(value: serde_json::Value) -> Frame {
        Frame::json(Opcode::Frame, &value).unwrap()
    }

    /// Subscribes a recorder for `kind` and returns what it saw.
    fn record(d: &Dispatcher, kind: Option<MessageKind>) -> Arc<Mutex<Vec<Message>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        d.subscribe(
            kind,
            Arc::new(move |m: &Message| sink.lock().unwrap().push(m.clone())),
        );
        seen
    }

    fn join(secret: &str) -> Message {
        Message::Join(SecretMessage {
            secret: secret.into(),
        })
    }

    // =====================================================================
    // publish() / subscribers
    // =====================================================================

    #[test]
    fn test_publish_immediate_filters_by_kind() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        let joins = record(&d, Some(MessageKind::Join));
        let all = record(&d, None);

        d.publish(join("a"));
        d.publish(Message::ConnectionEstablished { pipe: 0 });

        assert_eq!(joins.lock().unwrap().len(), 1);
        assert_eq!(all.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_publish_preserves_order() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        let all = record(&d, None);

        d.publish(join("1"));
        d.publish(join("2"));
        d.publish(join("3"));

        assert_eq!(*all.lock().unwrap(), vec![join("1"), join("2"), join("3")]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let id = d.subscribe(None, Arc::new(move |_| *sink.lock().unwrap() += 1));

        d.publish(join("a"));
        assert!(d.unsubscribe(id));
        assert!(!d.unsubscribe(id));
        d.publish(join("b"));

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_callback_may_subscribe_without_deadlock() {
        let d = Arc::new(Dispatcher::new(DeliveryMode::Immediate, 8));
        let inner = Arc::clone(&d);
        d.subscribe(
            None,
            Arc::new(move |_| {
                inner.subscribe(None, Arc::new(|_| {}));
            }),
        );
        d.publish(join("a"));
    }

    #[test]
    fn test_invoke_queued_delivers_on_caller_and_drains() {
        let d = Dispatcher::new(DeliveryMode::Queued, 8);
        let seen = record(&d, None);

        d.publish(join("a"));
        assert!(seen.lock().unwrap().is_empty());

        let drained = d.invoke();

        assert_eq!(drained, vec![join("a")]);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(d.invoke().is_empty());
    }

    #[test]
    fn test_publish_queued_drops_oldest_when_full() {
        let d = Dispatcher::new(DeliveryMode::Queued, 2);
        d.publish(join("1"));
        d.publish(join("2"));
        d.publish(join("3"));
        assert_eq!(d.invoke(), vec![join("2"), join("3")]);
    }

    #[test]
    fn test_invoke_immediate_is_empty() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        d.publish(join("1"));
        assert!(d.invoke().is_empty());
    }

    // =====================================================================
    // on_frame()
    // =====================================================================

    #[test]
    fn test_on_frame_ping_answers_with_same_payload() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        let ping = Frame::new(Opcode::Ping, b"[42]".to_vec());
        assert_eq!(
            d.on_frame(&ping, &CommandQueue::default()),
            Dispatch::Pong(Bytes::from_static(b"[42]"))
        );
    }

    #[test]
    fn test_on_frame_close_returns_peer_closed() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        let close = Frame::json(Opcode::Close, &json!({"code": 4000, "message": "bye"})).unwrap();
        assert_eq!(
            d.on_frame(&close, &CommandQueue::default()),
            Dispatch::PeerClosed(CloseMessage {
                code: 4000,
                reason: "bye".into()
            })
        );
    }

    #[tokio::test]
    async fn test_on_frame_reply_resolves_and_is_not_broadcast() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        let all = record(&d, None);
        let q = CommandQueue::default();
        let receipt = q.enqueue(Command::Subscribe, json!({}));
        let nonce = receipt.nonce().to_owned();

        let reply = frame(json!({
            "cmd": "SUBSCRIBE",
            "evt": "ACTIVITY_JOIN",
            "data": {"evt": "ACTIVITY_JOIN"},
            "nonce": nonce,
        }));
        assert_eq!(d.on_frame(&reply, &q), Dispatch::Handled);

        assert_eq!(receipt.await, Ok(json!({"evt": "ACTIVITY_JOIN"})));
        assert!(all.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_on_frame_error_reply_rejects_command() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        let q = CommandQueue::default();
        let receipt = q.enqueue(Command::SetActivity, json!({}));
        let nonce = receipt.nonce().to_owned();

        d.on_frame(
            &frame(json!({"evt": "ERROR", "data": {"code": 4000, "message": "bad"}, "nonce": nonce})),
            &q,
        );

        assert_eq!(
            receipt.await,
            Err(CommandError::Rejected {
                code: 4000,
                message: "bad".into()
            })
        );
    }

    #[test]
    fn test_on_frame_unclaimed_event_is_published() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        let all = record(&d, None);

        d.on_frame(
            &frame(json!({"cmd": "DISPATCH", "evt": "ACTIVITY_JOIN", "data": {"secret": "s"}, "nonce": "77"})),
            &CommandQueue::default(),
        );

        assert_eq!(*all.lock().unwrap(), vec![join("s")]);
    }

    #[test]
    fn test_on_frame_malformed_or_unknown_is_dropped() {
        let d = Dispatcher::new(DeliveryMode::Immediate, 8);
        let all = record(&d, None);
        let q = CommandQueue::default();

        assert_eq!(
            d.on_frame(&Frame::new(Opcode::Frame, b"{nope".to_vec()), &q),
            Dispatch::Handled
        );
        let mut unknown = bytes::BytesMut::new();
        presence_rpc_protocol::FrameCodec::new()
            .encode(&Frame::new(Opcode::Pong, Vec::new()), &mut unknown)
            .unwrap();
        unknown[0] = 9;
        let unknown = presence_rpc_protocol::FrameCodec::new()
            .decode(&mut unknown)
            .unwrap()
            .unwrap();
        assert_eq!(d.on_frame(&unknown, &q), Dispatch::Handled);

        assert!(all.lock().unwrap().is_empty());
    }
}

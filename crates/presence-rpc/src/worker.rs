//! The background worker: the connection state machine.
//!
//! One tokio task per client owns the pipe and runs:
//!
//! 1. **Discover** → probe pipes, publish `ConnectionEstablished`/`ConnectionFailed`
//! 2. **Handshake** → write `{v, client_id}`, wait for `READY`
//! 3. **Ready loop** → flush commands, then one due presence, then wait for
//!    the next frame, a wake-up, the presence deadline, or the sweep tick
//! 4. **Lost** → fail pending commands, requeue presence, publish `Close`,
//!    back off, go to 1
//!
//! A version mismatch ends the task with `Fatal`. Disposal is observed at
//! every await point through the shutdown watch.
//!
//! Callers never touch the pipe. They mutate [`Shared`] (queue, presence
//! slot, subscription set) and poke [`Shared::wake`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use presence_rpc_pacer::PresenceCoalescer;
use presence_rpc_protocol::{
    ArgumentPayload, CloseMessage, CloseRequest, Command, ErrorMessage, EventFlags, FatalMessage,
    Frame, FrameCodec, FrameError, FrameReader, HandshakeError, Message, Opcode,
    PROTOCOL_VERSION, ReadyMessage, SetActivityArgs, User, handshake_frame, validate_ack,
};
use presence_rpc_session::{BackoffDelay, CommandError, CommandQueue};
use presence_rpc_transport::{ConnectionCloser, Connector, PipeConnection, PipeTarget, discover};
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::dispatcher::{Dispatch, Dispatcher};
use crate::{ClientConfig, ClientError, ConnectionState};

/// How long the worker spends on the courtesy `Close` frame at disposal.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the client handle and its worker.
///
/// Everything here is safe to touch from any task. The worker never holds
/// one of these locks across an await.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) queue: CommandQueue,
    /// `None` inside the slot means "clear the presence".
    pub(crate) presence: PresenceCoalescer<Option<Value>>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) user: Mutex<Option<User>>,
    pub(crate) subscription: Mutex<EventFlags>,
    /// Wakes the ready loop when new outbound work arrives.
    pub(crate) wake: Notify,
    /// Set once, on disposal.
    pub(crate) shutdown: watch::Sender<bool>,
    /// Closer of the live connection, for forced disposal.
    pub(crate) active: Mutex<Option<ConnectionCloser>>,
}

impl Shared {
    pub(crate) fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "state changed");
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn active(&self) -> MutexGuard<'_, Option<ConnectionCloser>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn user(&self) -> MutexGuard<'_, Option<User>> {
        self.user.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscription(&self) -> MutexGuard<'_, EventFlags> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `SUBSCRIBE` or `UNSUBSCRIBE` for each event in `flags`.
    pub(crate) fn enqueue_subscription(&self, command: Command, flags: EventFlags) {
        for event in flags.events() {
            trace!(cmd = %command, evt = %event, "queueing subscription change");
            let _receipt = self.queue.enqueue_event(command, event);
        }
    }

    /// Final cleanup once nothing will be sent any more.
    pub(crate) fn dispose_state(&self) {
        if let Some(closer) = self.active().take() {
            closer.close();
        }
        self.queue.fail_all(CommandError::Disposed);
        self.presence.clear();
        *self.user() = None;
        self.set_state(ConnectionState::Closed);
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How one pass through discover → handshake → ready ended.
enum Outcome {
    /// Back off and try again.
    Retry,
    /// Stop for good and report why.
    Fatal(String),
    /// Disposal was requested.
    Shutdown,
}

/// How the ready loop ended.
enum LoopEnd {
    Lost(CloseMessage),
    Shutdown,
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

/// The two things every wait must race: disposal and the expiry sweep.
struct Timers {
    shutdown: watch::Receiver<bool>,
    sweep: Interval,
}

impl Timers {
    /// Runs `fut` to completion unless disposal is requested first, sweeping
    /// timed-out commands while waiting.
    async fn guard<F: Future>(&mut self, queue: &CommandQueue, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut self.shutdown) => return None,
                out = &mut fut => return Some(out),
                _ = self.sweep.tick() => {
                    queue.expire(Instant::now());
                }
            }
        }
    }
}

/// Resolves once the shutdown flag is set.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Runs the connection state machine until disposal or a fatal error.
pub(crate) async fn run<C: Connector>(shared: Arc<Shared>, connector: C) {
    let config = &shared.config;
    let mut backoff = BackoffDelay::new(config.backoff_min, config.backoff_max);
    let codec = FrameCodec::with_max_payload(config.max_payload);

    let mut sweep = tokio::time::interval(config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut timers = Timers {
        shutdown: shared.shutdown.subscribe(),
        sweep,
    };

    info!(application_id = %config.application_id, "worker started");

    loop {
        match connect_once(&shared, &connector, codec, &mut backoff, &mut timers).await {
            Outcome::Retry => {}
            Outcome::Shutdown => break,
            Outcome::Fatal(reason) => {
                warn!(%reason, "giving up, no further reconnects");
                shared.set_state(ConnectionState::Closed);
                *shared.active() = None;
                shared.queue.fail_all(CommandError::ConnectionLost);
                shared
                    .dispatcher
                    .publish(Message::Fatal(FatalMessage { reason }));
                return;
            }
        }

        shared.set_state(ConnectionState::Disconnected);
        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, attempt = backoff.failures(), "reconnecting after backoff");
        if timers
            .guard(&shared.queue, tokio::time::sleep(delay))
            .await
            .is_none()
        {
            break;
        }
    }

    shared.dispose_state();
    info!("worker stopped");
}

/// One discover → handshake → ready pass.
async fn connect_once<C: Connector>(
    shared: &Shared,
    connector: &C,
    codec: FrameCodec,
    backoff: &mut BackoffDelay,
    timers: &mut Timers,
) -> Outcome {
    let config = &shared.config;

    // --- Step 1: Discover ---
    shared.set_state(ConnectionState::Discovering);
    let found = timers
        .guard(&shared.queue, discover(connector, config.pipe))
        .await;
    let mut conn = match found {
        None => return Outcome::Shutdown,
        Some(Ok(conn)) => conn,
        Some(Err(e)) => {
            debug!(error = %e, "discovery failed");
            let pipe = match config.pipe {
                PipeTarget::Any => None,
                PipeTarget::Index(n) => Some(n),
            };
            shared.dispatcher.publish(Message::ConnectionFailed { pipe });
            return Outcome::Retry;
        }
    };

    let conn_id = conn.id();
    *shared.active() = Some(conn.closer());
    if shared.is_shutdown() {
        conn.close().await;
        return Outcome::Shutdown;
    }
    info!(%conn_id, pipe = conn.pipe(), "pipe connected");
    shared
        .dispatcher
        .publish(Message::ConnectionEstablished { pipe: conn.pipe() });

    // --- Step 2: Handshake ---
    shared.set_state(ConnectionState::Connecting);
    let mut reader = FrameReader::new(codec);
    let acked = timers
        .guard(&shared.queue, handshake(shared, &mut conn, &mut reader, codec))
        .await;
    let ready = match acked {
        None => {
            conn.close().await;
            return Outcome::Shutdown;
        }
        Some(Ok(ready)) => ready,
        Some(Err(e)) => {
            conn.close().await;
            *shared.active() = None;
            if !e.is_retryable() {
                return Outcome::Fatal(e.to_string());
            }
            warn!(%conn_id, error = %e, "handshake failed");
            let close = match e {
                HandshakeError::PeerClosed { code, reason } => CloseMessage { code, reason },
                HandshakeError::Rejected { code, message } => CloseMessage {
                    code,
                    reason: message,
                },
                other => CloseMessage {
                    code: -1,
                    reason: other.to_string(),
                },
            };
            shared.dispatcher.publish(Message::Close(close));
            return Outcome::Retry;
        }
    };

    // --- Step 3: Ready ---
    backoff.reset();
    *shared.user() = Some(ready.user.clone());
    {
        // Under the subscription lock so a concurrent set_subscription
        // either lands before this (and is covered) or sees Ready.
        let flags = shared.subscription();
        shared.set_state(ConnectionState::Ready);
        shared.enqueue_subscription(Command::Subscribe, *flags);
    }
    info!(%conn_id, user = %ready.user.display_name(), "ready");
    shared.dispatcher.publish(Message::Ready(ready));

    match ready_loop(shared, &mut conn, &mut reader, codec, timers).await {
        LoopEnd::Shutdown => {
            shared.set_state(ConnectionState::Closing);
            send_close_request(&mut conn, codec).await;
            conn.close().await;
            Outcome::Shutdown
        }
        LoopEnd::Lost(close) => {
            conn.close().await;
            connection_lost(shared, close);
            Outcome::Retry
        }
    }
}

/// Writes the handshake and waits (bounded) for the acknowledgement.
async fn handshake(
    shared: &Shared,
    conn: &mut PipeConnection,
    reader: &mut FrameReader,
    codec: FrameCodec,
) -> Result<ReadyMessage, HandshakeError> {
    let frame = handshake_frame(&shared.config.application_id)?;
    write_frame(conn, codec, &frame).await?;
    shared.set_state(ConnectionState::AwaitingHandshakeAck);

    let ack = tokio::time::timeout(shared.config.handshake_timeout, reader.next_frame(conn))
        .await
        .map_err(|_| HandshakeError::TimedOut)??;
    validate_ack(&ack, PROTOCOL_VERSION)
}

/// The steady state: write due work, then wait for something to happen.
async fn ready_loop(
    shared: &Shared,
    conn: &mut PipeConnection,
    reader: &mut FrameReader,
    codec: FrameCodec,
    timers: &mut Timers,
) -> LoopEnd {
    loop {
        // A busy pipe can keep the sweep branch below from ever winning.
        shared.queue.expire(Instant::now());

        // Commands first, in enqueue order.
        while let Some(cmd) = shared.queue.pop_next() {
            let bytes = match encode_payload(codec, &cmd.payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(nonce = %cmd.nonce, error = %e, "command could not be encoded");
                    shared.queue.resolve(
                        &cmd.nonce,
                        Err(ErrorMessage {
                            code: -1,
                            message: e.to_string(),
                        }),
                    );
                    continue;
                }
            };
            trace!(nonce = %cmd.nonce, cmd = %cmd.payload.cmd, "writing command");
            if let Err(e) = conn.send(&bytes).await {
                return LoopEnd::Lost(transport_close(e));
            }
        }

        // Then at most one presence.
        if let Some(activity) = shared.presence.take_due(Instant::now()) {
            if let Err(close) = send_presence(shared, conn, codec, activity).await {
                return LoopEnd::Lost(close);
            }
        }

        let due = shared.presence.next_due(Instant::now());
        tokio::select! {
            biased;
            _ = stopped(&mut timers.shutdown) => return LoopEnd::Shutdown,
            frame = reader.next_frame(conn) => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => return LoopEnd::Lost(transport_close(e)),
                };
                match shared.dispatcher.on_frame(&frame, &shared.queue) {
                    Dispatch::Handled => {}
                    Dispatch::Pong(payload) => {
                        trace!("answering ping");
                        if let Err(e) = write_frame(conn, codec, &Frame::new(Opcode::Pong, payload)).await {
                            return LoopEnd::Lost(transport_close(e));
                        }
                    }
                    Dispatch::PeerClosed(close) => {
                        info!(code = close.code, reason = %close.reason, "peer closed the pipe");
                        return LoopEnd::Lost(close);
                    }
                }
            }
            _ = shared.wake.notified() => {}
            _ = sleep_until_due(due) => {}
            _ = timers.sweep.tick() => {
                shared.queue.expire(Instant::now());
            }
        }
    }
}

async fn send_presence(
    shared: &Shared,
    conn: &mut PipeConnection,
    codec: FrameCodec,
    activity: Option<Value>,
) -> Result<(), CloseMessage> {
    let args = match serde_json::to_value(SetActivityArgs::new(activity)) {
        Ok(args) => args,
        Err(e) => {
            warn!(error = %e, "presence could not be encoded");
            return Ok(());
        }
    };
    // Not registered in the queue: the reply is broadcast as PresenceUpdate.
    let payload =
        ArgumentPayload::new(Command::SetActivity, args).with_nonce(shared.queue.next_nonce());
    let bytes = match encode_payload(codec, &payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "presence dropped");
            return Ok(());
        }
    };
    debug!("sending presence");
    conn.send(&bytes).await.map_err(transport_close)
}

/// Best-effort `Close` frame before hanging up.
async fn send_close_request(conn: &mut PipeConnection, codec: FrameCodec) {
    let frame = match Frame::json(Opcode::Close, &CloseRequest::new("client disposed")) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "close request could not be encoded");
            return;
        }
    };
    match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, write_frame(conn, codec, &frame)).await {
        Ok(Ok(())) => trace!("close request sent"),
        Ok(Err(e)) => debug!(error = %e, "close request not sent"),
        Err(_) => debug!("close request timed out"),
    }
}

/// Bookkeeping after the ready connection broke.
fn connection_lost(shared: &Shared, close: CloseMessage) {
    *shared.active() = None;
    *shared.user() = None;
    {
        // Same lock as the Ready transition: a concurrent set_subscription
        // either queues its diff before the failure below or sees the new state.
        let _flags = shared.subscription();
        shared.set_state(ConnectionState::Disconnected);
    }
    let failed = shared.queue.fail_all(CommandError::ConnectionLost);
    shared.presence.connection_lost();
    info!(code = close.code, reason = %close.reason, failed, "connection lost");
    shared.dispatcher.publish(Message::Close(close));
}

fn encode_payload(codec: FrameCodec, payload: &ArgumentPayload) -> Result<Bytes, ClientError> {
    let frame = Frame::json(Opcode::Frame, payload)?;
    Ok(codec.encode_to_bytes(&frame)?)
}

async fn write_frame(
    conn: &mut PipeConnection,
    codec: FrameCodec,
    frame: &Frame,
) -> Result<(), FrameError> {
    let bytes = codec.encode_to_bytes(frame)?;
    conn.send(&bytes).await?;
    Ok(())
}

fn transport_close(error: impl std::fmt::Display) -> CloseMessage {
    CloseMessage {
        code: -1,
        reason: error.to_string(),
    }
}
